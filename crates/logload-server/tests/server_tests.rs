//! Trigger host routes against in-memory clients

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use logload_common::types::{NotificationMessage, SourceReference};
use logload_ingest::{warehouse::ScriptedWarehouse, InMemoryClients, Stages};
use logload_server::{app, AppState};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn stage_env(name: &str) -> Option<String> {
    let value = match name {
        "PROJECT_ID" => "test-project",
        "CONTENT_TOPIC_ID" => "content",
        "DEST_BUCKET_NAME" => "dest-bucket",
        "DATASET_ID" => "D",
        "TABLE_ID" => "U",
        _ => return None,
    };
    Some(value.to_string())
}

fn test_app(clients: &InMemoryClients, request_timeout: Duration) -> Router {
    app(AppState {
        stages: Stages::with_env(Arc::new(clients.clone()), stage_env),
        request_timeout,
    })
}

fn zip_with(name: &str, data: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(name, zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap().into_inner()
}

fn push_body(bucket: &str, file_path: &str) -> Value {
    let data = STANDARD.encode(NotificationMessage::new(bucket, file_path).to_json().unwrap());
    json!({
        "message": {"data": data, "messageId": "1", "publishTime": "2024-01-01T00:00:00Z"},
        "subscription": "projects/test-project/subscriptions/load"
    })
}

fn binary_event(uri: &str, event_type: &str, data: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("ce-id", "evt-1")
        .header("ce-specversion", "1.0")
        .header("ce-type", event_type)
        .header("ce-source", "//test")
        .body(Body::from(serde_json::to_vec(data).unwrap()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let clients = InMemoryClients::default();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(test_app(&clients, Duration::from_secs(30)), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_unzip_binary_mode() {
    let clients = InMemoryClients::default();
    clients.store.insert(
        SourceReference::new("src-bucket", "test.zip"),
        zip_with("test.tgz", b"tgz bytes"),
    );

    let request = binary_event(
        "/unzip",
        "google.cloud.storage.object.v1.finalized",
        &json!({"bucket": "src-bucket", "name": "test.zip", "metageneration": "1"}),
    );
    let (status, body) = send(test_app(&clients, Duration::from_secs(30)), request).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["entries_written"], 1);
    assert_eq!(
        body["messages"],
        json!([{"bucket": "dest-bucket", "filePath": "test.zip/test.tgz"}])
    );
    assert_eq!(
        clients.bus.published(),
        vec![NotificationMessage::new("dest-bucket", "test.zip/test.tgz")]
    );
}

#[tokio::test]
async fn test_unzip_structured_mode() {
    let clients = InMemoryClients::default();
    clients.store.insert(
        SourceReference::new("src-bucket", "logs.zip"),
        zip_with("access.log", b"line\n"),
    );

    let event = json!({
        "specversion": "1.0",
        "id": "evt-2",
        "source": "//storage.googleapis.com/projects/_/buckets/src-bucket",
        "type": "google.cloud.storage.object.v1.finalized",
        "data": {"bucket": "src-bucket", "name": "logs.zip"}
    });
    let request = Request::builder()
        .method("POST")
        .uri("/unzip")
        .header("content-type", "application/cloudevents+json")
        .body(Body::from(serde_json::to_vec(&event).unwrap()))
        .unwrap();

    let (status, _) = send(test_app(&clients, Duration::from_secs(30)), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(clients
        .store
        .get(&SourceReference::new("dest-bucket", "logs.zip/access.log"))
        .is_some());
}

#[tokio::test]
async fn test_load_plain_push() {
    let clients = InMemoryClients::default();
    let request = Request::builder()
        .method("POST")
        .uri("/load")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&push_body("dest-bucket", "logs.zip/access.log")).unwrap(),
        ))
        .unwrap();

    let (status, body) = send(test_app(&clients, Duration::from_secs(30)), request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["job_id"], "scripted_1");
    assert_eq!(clients.warehouse.submitted().len(), 1);
}

#[tokio::test]
async fn test_undecodable_event_is_bad_request() {
    let clients = InMemoryClients::default();
    let request = binary_event(
        "/load-log",
        "google.cloud.storage.object.v1.finalized",
        &json!({"bucket": "src-bucket"}),
    );

    let (status, body) = send(test_app(&clients, Duration::from_secs(30)), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);
    assert!(clients.warehouse.submitted().is_empty());
}

#[tokio::test]
async fn test_stage_failure_is_server_error() {
    let clients = InMemoryClients::default();
    let request = binary_event(
        "/untar",
        "google.cloud.pubsub.topic.v1.messagePublished",
        &push_body("dest-bucket", "missing.tgz"),
    );

    let (status, body) = send(test_app(&clients, Duration::from_secs(30)), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("gs://dest-bucket/missing.tgz"), "{}", message);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_invocation() {
    let clients = InMemoryClients {
        warehouse: ScriptedWarehouse::succeeding().with_wait_delay(Duration::from_secs(3600)),
        wait_timeout: Duration::from_secs(7200),
        ..InMemoryClients::default()
    };
    let request = binary_event(
        "/load",
        "google.cloud.pubsub.topic.v1.messagePublished",
        &push_body("dest-bucket", "logs.zip/access.log"),
    );

    let (status, body) = send(test_app(&clients, Duration::from_secs(1)), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Cancelled"));
}
