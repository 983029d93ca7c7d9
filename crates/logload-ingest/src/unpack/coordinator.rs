//! Drives one unpack invocation
//!
//! The archive is read strictly in order and every entry is written before
//! the next one is read. Only notification dispatch runs concurrently: one
//! task per written entry on a `JoinSet`, all joined before returning.

use super::publisher::EntryPublisher;
use crate::archive::{ArchiveKind, ArchiveReader};
use crate::bus::MessageBus;
use crate::storage::ObjectStore;
use logload_common::{
    types::{NotificationMessage, SourceReference},
    DispatchFailure, PipelineError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One archive to unpack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackRequest {
    pub source: SourceReference,
    pub kind: ArchiveKind,
    /// Object size announced by the trigger, if any
    pub declared_size: Option<u64>,
}

impl UnpackRequest {
    pub fn new(source: SourceReference, kind: ArchiveKind) -> Self {
        Self {
            source,
            kind,
            declared_size: None,
        }
    }

    pub fn with_declared_size(mut self, size: Option<u64>) -> Self {
        self.declared_size = size;
        self
    }
}

/// Outcome of a successful unpack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackReport {
    pub source: SourceReference,
    pub entries_written: usize,
    pub entries_skipped: usize,
    /// Published notifications, sorted by destination path
    pub messages: Vec<NotificationMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reading,
    Writing,
    Dispatching,
    Joining,
    Succeeded,
    Failed,
}

struct PhaseLog(Phase);

impl PhaseLog {
    fn enter(&mut self, next: Phase) {
        debug!(from = ?self.0, to = ?next, "Unpack phase");
        self.0 = next;
    }
}

type DispatchResult = (NotificationMessage, anyhow::Result<String>);

pub struct FanOutCoordinator {
    store: Arc<dyn ObjectStore>,
    bus: Arc<dyn MessageBus>,
    publisher: EntryPublisher,
}

impl FanOutCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bus: Arc<dyn MessageBus>,
        dest_bucket: impl Into<String>,
    ) -> Self {
        Self {
            publisher: EntryPublisher::new(store.clone(), dest_bucket),
            store,
            bus,
        }
    }

    #[instrument(skip_all, fields(source = %request.source, kind = %request.kind))]
    pub async fn run(
        &self,
        request: &UnpackRequest,
        cancel: &CancellationToken,
    ) -> Result<UnpackReport> {
        let source = &request.source;
        let mut phase = PhaseLog(Phase::Idle);

        let reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { phase: "opening" }),
            opened = self.store.open_read(source) => opened.map_err(|cause| PipelineError::SourceIo {
                object: source.uri(),
                cause,
            })?,
        };

        let mut archive =
            ArchiveReader::open(request.kind, source, reader, request.declared_size, cancel);
        let mut dispatches: JoinSet<DispatchResult> = JoinSet::new();
        let mut in_flight = HashMap::new();
        let mut written = 0usize;
        let mut primary: Option<PipelineError> = None;

        loop {
            phase.enter(Phase::Reading);
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    primary = Some(PipelineError::Cancelled { phase: "reading" });
                    break;
                },
                next = archive.next_entry() => next,
            };
            let Some(entry) = next else {
                break;
            };

            phase.enter(Phase::Writing);
            let message = match self.publisher.publish(source, entry, cancel).await {
                Ok(message) => message,
                Err(err) => {
                    primary = Some(err);
                    break;
                },
            };
            written += 1;

            phase.enter(Phase::Dispatching);
            let handle = dispatches.spawn(dispatch(self.bus.clone(), message.clone(), cancel.clone()));
            in_flight.insert(handle.id(), message);
        }

        let summary = if primary.is_some() {
            archive.abandon().await;
            None
        } else {
            match archive.finish().await {
                Ok(summary) => Some(summary),
                Err(_) if cancel.is_cancelled() => {
                    primary = Some(PipelineError::Cancelled { phase: "reading" });
                    None
                },
                Err(err) => {
                    primary = Some(err);
                    None
                },
            }
        };

        phase.enter(Phase::Joining);
        let mut messages = Vec::with_capacity(written);
        let mut failures = Vec::new();
        while let Some(joined) = dispatches.join_next_with_id().await {
            match joined {
                Ok((id, (message, Ok(message_id)))) => {
                    in_flight.remove(&id);
                    debug!(file_path = %message.file_path, %message_id, "Notification published");
                    messages.push(message);
                },
                Ok((id, (message, Err(cause)))) => {
                    in_flight.remove(&id);
                    failures.push(DispatchFailure {
                        message,
                        cause: format!("{:#}", cause),
                    });
                },
                Err(join) => {
                    if let Some(message) = in_flight.remove(&join.id()) {
                        failures.push(DispatchFailure {
                            message,
                            cause: format!("dispatch task failed: {}", join),
                        });
                    }
                },
            }
        }

        if primary.is_none() && cancel.is_cancelled() && !failures.is_empty() {
            primary = Some(PipelineError::Cancelled { phase: "dispatching" });
        }

        if let Some(err) = primary {
            phase.enter(Phase::Failed);
            if !failures.is_empty() {
                let failed = failures.len();
                warn!(
                    failed,
                    "Notifications also failed: {}",
                    PipelineError::Dispatch { failures }
                );
            }
            error!(error = %err, written, "Unpack failed");
            return Err(err);
        }

        if !failures.is_empty() {
            phase.enter(Phase::Failed);
            failures.sort_by(|a, b| a.message.file_path.cmp(&b.message.file_path));
            let err = PipelineError::Dispatch { failures };
            error!(error = %err, written, "Unpack failed");
            return Err(err);
        }

        phase.enter(Phase::Succeeded);
        messages.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        let skipped = summary.map(|s| s.skipped).unwrap_or_default();
        info!(written, skipped, "Archive unpacked");

        Ok(UnpackReport {
            source: source.clone(),
            entries_written: written,
            entries_skipped: skipped,
            messages,
        })
    }
}

async fn dispatch(
    bus: Arc<dyn MessageBus>,
    message: NotificationMessage,
    cancel: CancellationToken,
) -> DispatchResult {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow::anyhow!("cancelled before publish completed")),
        published = bus.publish(&message) => published,
    };
    (message, result)
}
