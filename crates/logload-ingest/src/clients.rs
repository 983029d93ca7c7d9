//! Construction of the capability clients
//!
//! Stages ask a [`ClientFactory`] for their clients on every invocation,
//! because the topic and project come from per-invocation configuration.

use crate::bus::{MemoryBus, MessageBus, PubSubPublisher};
use crate::config::ClientConfig;
use crate::storage::{MemoryObjectStore, ObjectStore, S3ObjectStore};
use crate::warehouse::{BigQueryWarehouse, ScriptedWarehouse, Warehouse};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub trait ClientFactory: Send + Sync {
    fn store(&self) -> Arc<dyn ObjectStore>;

    fn bus(&self, project_id: &str, topic_id: &str) -> Arc<dyn MessageBus>;

    fn warehouse(&self, project_id: &str) -> Arc<dyn Warehouse>;

    /// Bound on waiting for a load job.
    fn wait_timeout(&self) -> Duration;
}

/// Production clients: S3-compatible storage, Pub/Sub and BigQuery over REST.
pub struct CloudClients {
    config: ClientConfig,
    http: reqwest::Client,
    store: Arc<S3ObjectStore>,
}

impl CloudClients {
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let store = Arc::new(S3ObjectStore::new(&config).await?);
        let http = config.http_client()?;
        Ok(Self {
            config,
            http,
            store,
        })
    }
}

impl ClientFactory for CloudClients {
    fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    fn bus(&self, project_id: &str, topic_id: &str) -> Arc<dyn MessageBus> {
        Arc::new(PubSubPublisher::from_config(
            &self.config,
            self.http.clone(),
            project_id,
            topic_id,
        ))
    }

    fn warehouse(&self, project_id: &str) -> Arc<dyn Warehouse> {
        Arc::new(BigQueryWarehouse::from_config(
            &self.config,
            self.http.clone(),
            project_id,
        ))
    }

    fn wait_timeout(&self) -> Duration {
        self.config.wait_timeout()
    }
}

/// In-process clients for tests and local runs.
#[derive(Clone)]
pub struct InMemoryClients {
    pub store: MemoryObjectStore,
    pub bus: MemoryBus,
    pub warehouse: ScriptedWarehouse,
    pub wait_timeout: Duration,
}

impl Default for InMemoryClients {
    fn default() -> Self {
        Self {
            store: MemoryObjectStore::new(),
            bus: MemoryBus::new(),
            warehouse: ScriptedWarehouse::succeeding(),
            wait_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientFactory for InMemoryClients {
    fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::new(self.store.clone())
    }

    fn bus(&self, _project_id: &str, _topic_id: &str) -> Arc<dyn MessageBus> {
        Arc::new(self.bus.clone())
    }

    fn warehouse(&self, _project_id: &str) -> Arc<dyn Warehouse> {
        Arc::new(self.warehouse.clone())
    }

    fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }
}
