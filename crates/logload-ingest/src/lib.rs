//! logload ingest library
//!
//! The two pipeline stages and the capabilities they run against.
//!
//! # Stages
//!
//! - **Unpack**: stream a zip or tar.gz object, write every regular entry to the
//!   destination bucket and publish one notification per entry
//!   ([`unpack::FanOutCoordinator`])
//! - **Load**: load one tab-delimited log file into the target table through a
//!   temporary staging table ([`load::LoadOrchestrator`])
//!
//! # Capabilities
//!
//! | Capability | Production | In-memory |
//! |---|---|---|
//! | [`storage::ObjectStore`] | [`storage::S3ObjectStore`] | [`storage::MemoryObjectStore`] |
//! | [`bus::MessageBus`] | [`bus::PubSubPublisher`] | [`bus::MemoryBus`] |
//! | [`warehouse::Warehouse`] | [`warehouse::BigQueryWarehouse`] | [`warehouse::ScriptedWarehouse`] |
//!
//! # Example
//!
//! ```no_run
//! use logload_ingest::{clients::InMemoryClients, stages::Stages};
//! use logload_common::types::StorageObjectEvent;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let stages = Stages::new(Arc::new(InMemoryClients::default()));
//!     let event = StorageObjectEvent::from_json(br#"{"bucket":"src","name":"logs.zip"}"#)?;
//!     let report = stages.unzip(&event, &CancellationToken::new()).await?;
//!     println!("{} entries written", report.entries_written);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod bus;
pub mod clients;
pub mod config;
pub mod load;
mod rest;
pub mod stages;
pub mod storage;
pub mod unpack;
pub mod warehouse;

pub use clients::{ClientFactory, CloudClients, InMemoryClients};
pub use stages::Stages;
