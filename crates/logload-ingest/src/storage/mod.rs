//! Object storage capability
//!
//! The unpack stages read one source object and write one destination object
//! per archive entry. Both directions are streaming: nothing here requires an
//! object to fit in memory (the zip reader buffers on its own account).

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use logload_common::types::SourceReference;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// An open source object.
pub struct ObjectReader {
    /// Length reported by the store, if it reported one
    pub size: Option<u64>,
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// A destination object being written.
///
/// Nothing becomes visible until [`ObjectWriter::finish`] succeeds. A writer
/// dropped without `finish` or `abort` may leave an unfinished upload behind
/// on the store, so callers abort explicitly on every failure path.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    async fn finish(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open_read(&self, object: &SourceReference) -> Result<ObjectReader>;

    async fn open_write(&self, object: &SourceReference) -> Result<Box<dyn ObjectWriter>>;
}
