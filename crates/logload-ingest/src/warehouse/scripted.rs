//! Warehouse double that replays a fixed script of outcomes

use super::{JobHandle, JobOutcome, Warehouse};
use crate::load::LoadScript;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Records submitted scripts and answers every job the same way.
#[derive(Clone)]
pub struct ScriptedWarehouse {
    outcome: JobOutcome,
    submit_error: Option<String>,
    wait_error: Option<String>,
    wait_delay: Option<Duration>,
    submitted: Arc<Mutex<Vec<LoadScript>>>,
}

impl ScriptedWarehouse {
    pub fn succeeding() -> Self {
        Self {
            outcome: JobOutcome::Succeeded,
            submit_error: None,
            wait_error: None,
            wait_delay: None,
            submitted: Arc::default(),
        }
    }

    /// Every job runs and ends in the given error.
    pub fn failing_job(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            outcome: JobOutcome::Failed {
                reason: Some(reason.into()),
                message: message.into(),
            },
            ..Self::succeeding()
        }
    }

    pub fn with_submit_error(mut self, message: impl Into<String>) -> Self {
        self.submit_error = Some(message.into());
        self
    }

    pub fn with_wait_error(mut self, message: impl Into<String>) -> Self {
        self.wait_error = Some(message.into());
        self
    }

    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    pub fn submitted(&self) -> Vec<LoadScript> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Warehouse for ScriptedWarehouse {
    async fn submit(&self, script: &LoadScript) -> Result<JobHandle> {
        if let Some(ref message) = self.submit_error {
            bail!("{}", message);
        }
        let mut submitted = self.submitted.lock().unwrap_or_else(PoisonError::into_inner);
        submitted.push(script.clone());
        Ok(JobHandle {
            job_id: format!("scripted_{}", submitted.len()),
            location: None,
        })
    }

    async fn wait(&self, _job: &JobHandle) -> Result<JobOutcome> {
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref message) = self.wait_error {
            bail!("{}", message);
        }
        Ok(self.outcome.clone())
    }
}
