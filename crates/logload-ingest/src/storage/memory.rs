//! In-memory object store with fault injection

use super::{ObjectReader, ObjectStore, ObjectWriter};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use logload_common::types::SourceReference;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

#[derive(Default)]
struct State {
    objects: HashMap<SourceReference, Bytes>,
    /// Reads of these objects fail after the given number of bytes
    broken_reads: HashMap<SourceReference, usize>,
    /// Writes to these destination paths fail
    broken_writes: HashSet<String>,
    /// Finalizing these destination paths fails
    broken_finishes: HashSet<String>,
    aborted: Vec<SourceReference>,
}

/// Object store held in a map, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, object: SourceReference, data: impl Into<Bytes>) {
        self.state().objects.insert(object, data.into());
    }

    pub fn get(&self, object: &SourceReference) -> Option<Bytes> {
        self.state().objects.get(object).cloned()
    }

    /// Finalized objects of one bucket, sorted by path.
    pub fn list(&self, bucket: &str) -> Vec<SourceReference> {
        let mut objects: Vec<_> = self
            .state()
            .objects
            .keys()
            .filter(|o| o.bucket == bucket)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        objects
    }

    /// Destination objects whose upload was aborted.
    pub fn aborted(&self) -> Vec<SourceReference> {
        self.state().aborted.clone()
    }

    /// Make reads of `object` fail once `after` bytes have been delivered.
    pub fn fail_read(&self, object: SourceReference, after: usize) {
        self.state().broken_reads.insert(object, after);
    }

    /// Make every write to a destination path ending in `suffix` fail.
    pub fn fail_write(&self, suffix: impl Into<String>) {
        self.state().broken_writes.insert(suffix.into());
    }

    /// Make finalizing a destination path ending in `suffix` fail.
    pub fn fail_finish(&self, suffix: impl Into<String>) {
        self.state().broken_finishes.insert(suffix.into());
    }
}

fn matches_any(set: &HashSet<String>, path: &str) -> bool {
    set.iter().any(|suffix| path.ends_with(suffix.as_str()))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn open_read(&self, object: &SourceReference) -> Result<ObjectReader> {
        let state = self.state();
        let data = state
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| anyhow!("object not found: {}", object))?;
        let size = Some(data.len() as u64);

        let body: Pin<Box<dyn AsyncRead + Send>> = match state.broken_reads.get(object) {
            Some(&after) => {
                let head = data.slice(..after.min(data.len()));
                Box::pin(Cursor::new(head).chain(BrokenRead))
            },
            None => Box::pin(Cursor::new(data)),
        };

        Ok(ObjectReader { size, body })
    }

    async fn open_write(&self, object: &SourceReference) -> Result<Box<dyn ObjectWriter>> {
        let state = self.state();
        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            object: object.clone(),
            buffer: BytesMut::new(),
            fail_write: matches_any(&state.broken_writes, &object.path),
            fail_finish: matches_any(&state.broken_finishes, &object.path),
        }))
    }
}

struct MemoryWriter {
    store: MemoryObjectStore,
    object: SourceReference,
    buffer: BytesMut,
    fail_write: bool,
    fail_finish: bool,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if self.fail_write {
            bail!("injected write failure for {}", self.object);
        }
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        if self.fail_finish {
            bail!("injected finalize failure for {}", self.object);
        }
        let MemoryWriter {
            store,
            object,
            buffer,
            ..
        } = *self;
        store.insert(object, buffer.freeze());
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.store.state().aborted.push(self.object.clone());
        Ok(())
    }
}

struct BrokenRead;

impl AsyncRead for BrokenRead {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "injected read failure",
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_object_visible_only_after_finish() {
        let store = MemoryObjectStore::new();
        let object = SourceReference::new("dest", "a.zip/x.log");

        let mut writer = store.open_write(&object).await.unwrap();
        writer.write(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write(Bytes::from_static(b"world")).await.unwrap();
        assert!(store.get(&object).is_none());

        writer.finish().await.unwrap();
        assert_eq!(store.get(&object).unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_broken_read_fails_after_prefix() {
        let store = MemoryObjectStore::new();
        let object = SourceReference::new("src", "a.tgz");
        store.insert(object.clone(), vec![7u8; 64]);
        store.fail_read(object.clone(), 10);

        let mut reader = store.open_read(&object).await.unwrap();
        let mut out = Vec::new();
        let err = reader.body.read_to_end(&mut out).await.unwrap_err();

        assert_eq!(out.len(), 10);
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryObjectStore::new();
        assert!(store
            .open_read(&SourceReference::new("src", "nope.zip"))
            .await
            .is_err());
    }
}
