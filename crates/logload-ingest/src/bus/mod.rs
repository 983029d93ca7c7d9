//! Message bus capability

use anyhow::Result;
use async_trait::async_trait;
use logload_common::types::NotificationMessage;

pub mod memory;
pub mod pubsub;

pub use memory::MemoryBus;
pub use pubsub::PubSubPublisher;

/// Publishes notifications on one topic, fixed at construction.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message and return the id the bus assigned to it.
    async fn publish(&self, message: &NotificationMessage) -> Result<String>;
}
