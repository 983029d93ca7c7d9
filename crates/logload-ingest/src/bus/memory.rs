//! In-memory message bus with fault injection

use super::MessageBus;
use anyhow::{bail, Result};
use async_trait::async_trait;
use logload_common::types::NotificationMessage;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct State {
    published: Vec<NotificationMessage>,
    /// Publishing a message whose file path ends with one of these fails
    broken: HashSet<String>,
    delay: Option<Duration>,
}

/// Records published messages, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Published messages sorted by file path. Publish order is not stable.
    pub fn published(&self) -> Vec<NotificationMessage> {
        let mut published = self.state().published.clone();
        published.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        published
    }

    pub fn fail_for(&self, suffix: impl Into<String>) {
        self.state().broken.insert(suffix.into());
    }

    /// Hold every publish for `delay` before it completes.
    pub fn delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, message: &NotificationMessage) -> Result<String> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state
            .broken
            .iter()
            .any(|suffix| message.file_path.ends_with(suffix.as_str()))
        {
            bail!("injected publish failure for {}", message.file_path);
        }
        state.published.push(message.clone());
        Ok(state.published.len().to_string())
    }
}
