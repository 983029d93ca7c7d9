//! Writes one archive entry to the destination bucket

use crate::archive::{path::join_entry_path, ArchiveEntry};
use crate::storage::{ObjectStore, ObjectWriter};
use logload_common::{
    types::{NotificationMessage, SourceReference},
    PipelineError, Result,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct EntryPublisher {
    store: Arc<dyn ObjectStore>,
    dest_bucket: String,
}

impl EntryPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, dest_bucket: impl Into<String>) -> Self {
        Self {
            store,
            dest_bucket: dest_bucket.into(),
        }
    }

    /// Copy the entry to `{dest_bucket}/{source path}/{entry name}`.
    ///
    /// The message is only returned once the object is finalized. On any
    /// failure the upload is aborted and nothing is returned.
    pub async fn publish(
        &self,
        source: &SourceReference,
        mut entry: ArchiveEntry,
        cancel: &CancellationToken,
    ) -> Result<NotificationMessage> {
        let path = join_entry_path(&source.path, &entry.name).ok_or_else(|| {
            PipelineError::ArchiveFormat {
                object: source.uri(),
                cause: anyhow::anyhow!("entry name {:?} has no usable path", entry.name),
            }
        })?;
        let dest = SourceReference::new(self.dest_bucket.clone(), path);

        let mut writer = self
            .store
            .open_write(&dest)
            .await
            .map_err(|cause| PipelineError::Write {
                object: dest.uri(),
                cause,
            })?;

        match copy_entry(&mut entry, &mut *writer, &dest, cancel).await {
            Ok(bytes) => {
                writer.finish().await.map_err(|cause| PipelineError::Write {
                    object: dest.uri(),
                    cause,
                })?;
                debug!(object = %dest, bytes, "Entry written");
                Ok(NotificationMessage::new(dest.bucket, dest.path))
            },
            Err(err) => {
                if let Err(abort) = writer.abort().await {
                    warn!(object = %dest, error = %format!("{:#}", abort), "Failed to abort partial upload");
                }
                Err(err)
            },
        }
    }
}

async fn copy_entry(
    entry: &mut ArchiveEntry,
    writer: &mut dyn ObjectWriter,
    dest: &SourceReference,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { phase: "writing" }),
            chunk = entry.next_chunk() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(total);
        };
        let chunk = chunk?;
        total += chunk.len() as u64;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { phase: "writing" }),
            written = writer.write(chunk) => written.map_err(|cause| PipelineError::Write {
                object: dest.uri(),
                cause,
            })?,
        }
    }
}
