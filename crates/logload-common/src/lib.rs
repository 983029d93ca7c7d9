//! logload common library
//!
//! Shared types, error handling and logging for the logload workspace.
//!
//! - **Error Handling**: [`PipelineError`], the failure taxonomy every stage reports
//! - **Types**: source references, notification messages and inbound trigger payloads
//! - **Logging**: `tracing` subscriber setup shared by the CLI and the trigger host
//!
//! # Example
//!
//! ```no_run
//! use logload_common::types::{NotificationMessage, SourceReference};
//!
//! let message = NotificationMessage::new("dest-bucket", "logs.zip/access.log");
//! let source = SourceReference::from(&message);
//! assert_eq!(source.uri(), "gs://dest-bucket/logs.zip/access.log");
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{DispatchFailure, PipelineError, Result};
