//! Staged load: submit the script, wait for it, inspect the outcome

use super::script::{LoadJobSpec, LoadScriptBuilder};
use crate::warehouse::{JobOutcome, Warehouse};
use logload_common::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReceipt {
    pub job_id: String,
    pub staging_table: String,
}

pub struct LoadOrchestrator {
    warehouse: Arc<dyn Warehouse>,
    wait_timeout: Duration,
}

impl LoadOrchestrator {
    pub fn new(warehouse: Arc<dyn Warehouse>, wait_timeout: Duration) -> Self {
        Self {
            warehouse,
            wait_timeout,
        }
    }

    #[instrument(skip(self, spec, cancel), fields(source = %spec.source_uri, staging = %spec.staging_id))]
    pub async fn run(&self, spec: &LoadJobSpec, cancel: &CancellationToken) -> Result<LoadReceipt> {
        let script = LoadScriptBuilder::build(spec);
        debug!(target_table = %spec.target_table(), "Submitting load script");

        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { phase: "submit" }),
            submitted = self.warehouse.submit(&script) => submitted.map_err(|cause| PipelineError::Submit {
                staging_table: script.staging_table.clone(),
                cause,
            })?,
        };
        info!(job_id = %job.job_id, "Load job submitted");

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { phase: "wait" }),
            waited = tokio::time::timeout(self.wait_timeout, self.warehouse.wait(&job)) => waited,
        };

        let outcome = match waited {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(cause)) => {
                return Err(PipelineError::Wait {
                    job_id: job.job_id,
                    cause,
                })
            },
            Err(_) => {
                return Err(PipelineError::Wait {
                    cause: anyhow::anyhow!("no terminal state after {:?}", self.wait_timeout),
                    job_id: job.job_id,
                })
            },
        };

        match outcome {
            JobOutcome::Succeeded => {
                info!(job_id = %job.job_id, "Load job succeeded");
                Ok(LoadReceipt {
                    job_id: job.job_id,
                    staging_table: script.staging_table,
                })
            },
            JobOutcome::Failed { reason, message } => {
                error!(job_id = %job.job_id, ?reason, %message, "Load job failed");
                Err(PipelineError::Execution {
                    job_id: job.job_id,
                    reason,
                    message,
                })
            },
        }
    }
}
