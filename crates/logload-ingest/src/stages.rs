//! Stage entry points
//!
//! Each handler turns one triggering event into a core call:
//!
//! | Handler | Event | Core |
//! |---|---|---|
//! | [`Stages::unzip`] | storage event | [`FanOutCoordinator`], zip |
//! | [`Stages::untar`] | push envelope | [`FanOutCoordinator`], tar.gz |
//! | [`Stages::load`] | push envelope | [`LoadOrchestrator`] |
//! | [`Stages::load_log`] | storage event | [`LoadOrchestrator`] |
//!
//! Stage configuration is read on every invocation, before any I/O, so a
//! missing variable fails the invocation instead of the process.

use crate::archive::ArchiveKind;
use crate::clients::ClientFactory;
use crate::config::{LoadConfig, UnpackConfig};
use crate::load::{LoadJobSpec, LoadOrchestrator, LoadReceipt};
use crate::unpack::{FanOutCoordinator, UnpackReport, UnpackRequest};
use logload_common::{
    types::{PubSubPushEnvelope, SourceReference, StorageObjectEvent},
    Result,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct Stages {
    clients: Arc<dyn ClientFactory>,
    lookup: Lookup,
}

impl Stages {
    /// Stages reading their configuration from the process environment.
    pub fn new(clients: Arc<dyn ClientFactory>) -> Self {
        dotenvy::dotenv().ok();
        Self::with_env(clients, |name| std::env::var(name).ok())
    }

    pub fn with_env(
        clients: Arc<dyn ClientFactory>,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            clients,
            lookup: Arc::new(lookup),
        }
    }

    fn unpack_config(&self) -> Result<UnpackConfig> {
        UnpackConfig::from_lookup(|name| (self.lookup)(name))
    }

    fn load_config(&self) -> Result<LoadConfig> {
        LoadConfig::from_lookup(|name| (self.lookup)(name))
    }

    pub async fn unzip(
        &self,
        event: &StorageObjectEvent,
        cancel: &CancellationToken,
    ) -> Result<UnpackReport> {
        log_storage_event(event);
        let request = UnpackRequest::new(event.source(), ArchiveKind::Zip)
            .with_declared_size(event.size);
        self.unpack(request, cancel).await
    }

    pub async fn untar(
        &self,
        envelope: &PubSubPushEnvelope,
        cancel: &CancellationToken,
    ) -> Result<UnpackReport> {
        let source = envelope.source()?;
        info!(message_id = ?envelope.message.message_id, source = %source, "Push message received");
        self.unpack(UnpackRequest::new(source, ArchiveKind::TarGz), cancel)
            .await
    }

    pub async fn load(
        &self,
        envelope: &PubSubPushEnvelope,
        cancel: &CancellationToken,
    ) -> Result<LoadReceipt> {
        let source = envelope.source()?;
        info!(message_id = ?envelope.message.message_id, source = %source, "Push message received");
        self.load_source(source, cancel).await
    }

    pub async fn load_log(
        &self,
        event: &StorageObjectEvent,
        cancel: &CancellationToken,
    ) -> Result<LoadReceipt> {
        log_storage_event(event);
        self.load_source(event.source(), cancel).await
    }

    /// Unpack one archive into the configured destination bucket.
    #[instrument(skip_all, fields(source = %request.source))]
    pub async fn unpack(
        &self,
        request: UnpackRequest,
        cancel: &CancellationToken,
    ) -> Result<UnpackReport> {
        let config = self.unpack_config()?;
        let coordinator = FanOutCoordinator::new(
            self.clients.store(),
            self.clients
                .bus(&config.project_id, &config.content_topic_id),
            config.dest_bucket_name,
        );
        coordinator.run(&request, cancel).await
    }

    /// Load one delimited log file into the configured table.
    #[instrument(skip_all, fields(source = %source))]
    pub async fn load_source(
        &self,
        source: SourceReference,
        cancel: &CancellationToken,
    ) -> Result<LoadReceipt> {
        let config = self.load_config()?;
        let spec = LoadJobSpec::new(config.dataset_id, config.table_id, &source);
        let orchestrator = LoadOrchestrator::new(
            self.clients.warehouse(&config.project_id),
            self.clients.wait_timeout(),
        );
        orchestrator.run(&spec, cancel).await
    }
}

fn log_storage_event(event: &StorageObjectEvent) {
    info!(
        bucket = %event.bucket,
        file = %event.name,
        metageneration = ?event.metageneration,
        created = ?event.time_created.map(|t| t.to_rfc3339()),
        updated = ?event.updated.map(|t| t.to_rfc3339()),
        "Storage event received"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clients::InMemoryClients;
    use logload_common::PipelineError;

    fn env(
        pairs: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        move |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[tokio::test]
    async fn test_missing_unpack_config_fails_before_io() {
        let clients = InMemoryClients::default();
        let stages = Stages::with_env(
            Arc::new(clients.clone()),
            env(&[("PROJECT_ID", "p"), ("CONTENT_TOPIC_ID", "t")]),
        );
        let event = StorageObjectEvent {
            bucket: "src-bucket".to_string(),
            name: "missing.zip".to_string(),
            ..Default::default()
        };

        let err = stages
            .unzip(&event, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref m) if m.contains("DEST_BUCKET_NAME")));
        assert!(clients.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_load_log_uses_event_object() {
        let clients = InMemoryClients::default();
        let stages = Stages::with_env(
            Arc::new(clients.clone()),
            env(&[("PROJECT_ID", "p"), ("DATASET_ID", "D"), ("TABLE_ID", "U")]),
        );
        let event = StorageObjectEvent {
            bucket: "dest-bucket".to_string(),
            name: "logs.zip/access.log".to_string(),
            ..Default::default()
        };

        let receipt = stages
            .load_log(&event, &CancellationToken::new())
            .await
            .unwrap();
        assert!(receipt.staging_table.starts_with("D.staging_"));

        let submitted = clients.warehouse.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].sql.contains("`D.U`"));
    }
}
