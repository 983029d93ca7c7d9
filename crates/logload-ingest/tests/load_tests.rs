//! Load stage against the scripted warehouse

use base64::{engine::general_purpose::STANDARD, Engine as _};
use logload_common::{
    types::{NotificationMessage, PubSubPushEnvelope},
    PipelineError,
};
use logload_ingest::{
    load::{script::SOURCE_URIS_PARAM, ParameterValue},
    warehouse::ScriptedWarehouse,
    InMemoryClients, Stages,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn load_env(name: &str) -> Option<String> {
    match name {
        "PROJECT_ID" => Some("test-project".to_string()),
        "DATASET_ID" => Some("D".to_string()),
        "TABLE_ID" => Some("U".to_string()),
        _ => None,
    }
}

fn envelope(bucket: &str, file_path: &str) -> PubSubPushEnvelope {
    let data = STANDARD.encode(NotificationMessage::new(bucket, file_path).to_json().unwrap());
    PubSubPushEnvelope::from_json(
        format!(r#"{{"message":{{"data":"{}","messageId":"7"}}}}"#, data).as_bytes(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_load_submits_script_for_notified_file() {
    let clients = InMemoryClients::default();
    let stages = Stages::with_env(Arc::new(clients.clone()), load_env);

    let receipt = stages
        .load(&envelope("dest-bucket", "test.zip/access.log"), &CancellationToken::new())
        .await
        .unwrap();

    let submitted = clients.warehouse.submitted();
    assert_eq!(submitted.len(), 1);
    let script = &submitted[0];
    assert_eq!(receipt.staging_table, script.staging_table);
    assert_eq!(receipt.job_id, "scripted_1");

    assert!(script.sql.contains("`D.U`"));
    assert!(script.sql.contains(&format!("`{}`", script.staging_table)));
    assert!(!script.sql.contains("gs://dest-bucket/test.zip/access.log"));
    assert_eq!(script.parameters.len(), 1);
    assert_eq!(script.parameters[0].name, SOURCE_URIS_PARAM);
    assert_eq!(
        script.parameters[0].value,
        ParameterValue::StringArray(vec!["gs://dest-bucket/test.zip/access.log".to_string()])
    );
}

#[tokio::test]
async fn test_each_invocation_gets_its_own_staging_table() {
    let clients = InMemoryClients::default();
    let stages = Stages::with_env(Arc::new(clients.clone()), load_env);
    let cancel = CancellationToken::new();

    let first = stages.load(&envelope("b", "x.log"), &cancel).await.unwrap();
    let second = stages.load(&envelope("b", "x.log"), &cancel).await.unwrap();
    assert_ne!(first.staging_table, second.staging_table);
}

#[tokio::test]
async fn test_failed_job_is_execution_error() {
    let clients = InMemoryClients {
        warehouse: ScriptedWarehouse::failing_job("invalid", "Too many errors"),
        ..InMemoryClients::default()
    };
    let stages = Stages::with_env(Arc::new(clients), load_env);

    let err = stages
        .load(&envelope("b", "x.log"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Execution { ref message, .. } if message == "Too many errors"));
    assert!(!err.is_permanent());
}

#[tokio::test(start_paused = true)]
async fn test_wait_bounded_by_client_timeout() {
    let clients = InMemoryClients {
        warehouse: ScriptedWarehouse::succeeding().with_wait_delay(Duration::from_secs(3600)),
        wait_timeout: Duration::from_secs(2),
        ..InMemoryClients::default()
    };
    let stages = Stages::with_env(Arc::new(clients), load_env);

    let err = stages
        .load(&envelope("b", "x.log"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Wait { .. }));
}

#[tokio::test]
async fn test_missing_table_config() {
    let clients = InMemoryClients::default();
    let stages = Stages::with_env(Arc::new(clients.clone()), |name: &str| {
        (name != "TABLE_ID").then(|| "x".to_string())
    });

    let err = stages
        .load(&envelope("b", "x.log"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Config(ref m) if m.contains("TABLE_ID")));
    assert!(clients.warehouse.submitted().is_empty());
}
