//! Warehouse capability: run one load script as one job

use crate::load::LoadScript;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod bigquery;
pub mod scripted;

pub use bigquery::BigQueryWarehouse;
pub use scripted::ScriptedWarehouse;

/// Identifies a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub location: Option<String>,
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed {
        reason: Option<String>,
        message: String,
    },
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Submit the script as a single job. Returns once the job is accepted.
    async fn submit(&self, script: &LoadScript) -> Result<JobHandle>;

    /// Block until the job reaches a terminal state.
    ///
    /// An `Err` means the state could not be observed; a job that ran and
    /// failed is `Ok(JobOutcome::Failed { .. })`.
    async fn wait(&self, job: &JobHandle) -> Result<JobOutcome>;
}
