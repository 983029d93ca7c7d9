//! Error types for the ingestion pipeline

use crate::types::NotificationMessage;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every way an unpack or load invocation can fail.
///
/// Variants carry the phase-specific identifier (object, staging table or job)
/// so the trigger layer can report the failure without extra context.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid trigger event: {0}")]
    InvalidEvent(String),

    #[error("Failed to read source object {object}: {cause:#}")]
    SourceIo {
        object: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Malformed archive {object}: {cause:#}")]
    ArchiveFormat {
        object: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Failed to write destination object {object}: {cause:#}")]
    Write {
        object: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("{}", describe_dispatch_failures(.failures))]
    Dispatch { failures: Vec<DispatchFailure> },

    #[error("Failed to submit load script for staging table {staging_table}: {cause:#}")]
    Submit {
        staging_table: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Load job {job_id} failed: {message}{}", reason_suffix(.reason))]
    Execution {
        job_id: String,
        reason: Option<String>,
        message: String,
    },

    #[error("Failed waiting for load job {job_id}: {cause:#}")]
    Wait {
        job_id: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Cancelled during {phase}")]
    Cancelled { phase: &'static str },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent(message.into())
    }

    /// True when the failure was caused by the invocation's input rather than
    /// by infrastructure. Redelivering such an event cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidEvent(_))
    }
}

/// One notification that could not be published.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub message: NotificationMessage,
    pub cause: String,
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.message.bucket, self.message.file_path, self.cause
        )
    }
}

fn describe_dispatch_failures(failures: &[DispatchFailure]) -> String {
    let listed: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!(
        "Failed to publish {} notification(s): {}",
        failures.len(),
        listed.join("; ")
    )
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" (reason: {})", reason),
        None => String::new(),
    }
}
