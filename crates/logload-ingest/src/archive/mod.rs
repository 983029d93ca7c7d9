//! Streaming archive reader
//!
//! The sync `flate2`/`tar`/`zip` decoders run on a blocking thread and hand
//! entries to the async side over bounded channels:
//!
//! ```text
//! object body -> CancellableRead -> SyncIoBridge -> SourceTap -> decoder
//!                                                                  |
//!               ArchiveReader::next_entry  <-- entries (cap 1) ----+
//!               ArchiveEntry::next_chunk   <-- chunks  (cap 4) ----+
//! ```
//!
//! Entries come out in archive order and must be drained one at a time: the
//! decoder does not move to the next entry until the current one's chunks
//! have been consumed or dropped.

use bytes::Bytes;
use logload_common::{types::SourceReference, PipelineError, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::storage::ObjectReader;

pub mod io;
pub mod path;
mod tar_gz;
mod zip_archive;

use self::io::CancellableRead;

/// Bytes per chunk handed to the writer.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between decoder and writer.
const CHUNK_QUEUE: usize = 4;

/// Container format of a source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Guess the kind from the object name.
    pub fn detect(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zip => f.write_str("zip"),
            Self::TarGz => f.write_str("tar.gz"),
        }
    }
}

impl std::str::FromStr for ArchiveKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar.gz" | "tgz" | "tar-gz" => Ok(Self::TarGz),
            _ => Err(anyhow::anyhow!("Unknown archive kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Source,
    Format,
    /// The consumer went away; nothing is wrong with the archive
    Abandoned,
}

/// Failure raised on the decoder thread. Cloned into the chunk stream of the
/// entry being read, so the writer sees the same cause the reader reports.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveFailure {
    kind: FailureKind,
    object: String,
    detail: String,
}

impl ArchiveFailure {
    fn source(object: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::Source, object, detail)
    }

    fn format(object: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::Format, object, detail)
    }

    fn abandoned(object: &str) -> Self {
        Self::new(FailureKind::Abandoned, object, "consumer dropped")
    }

    fn new(kind: FailureKind, object: &str, detail: impl std::fmt::Display) -> Self {
        Self {
            kind,
            object: object.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Classify an I/O error using the source tap.
    fn classify(object: &str, source_failed: &AtomicBool, err: std::io::Error) -> Self {
        if source_failed.load(Ordering::Relaxed) {
            Self::source(object, err)
        } else {
            Self::format(object, err)
        }
    }
}

impl From<ArchiveFailure> for PipelineError {
    fn from(failure: ArchiveFailure) -> Self {
        let cause = anyhow::anyhow!(failure.detail);
        match failure.kind {
            FailureKind::Source => PipelineError::SourceIo {
                object: failure.object,
                cause,
            },
            FailureKind::Format => PipelineError::ArchiveFormat {
                object: failure.object,
                cause,
            },
            FailureKind::Abandoned => PipelineError::Cancelled { phase: "reading" },
        }
    }
}

/// One regular-file member of an archive.
#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    chunks: mpsc::Receiver<std::result::Result<Bytes, ArchiveFailure>>,
}

impl ArchiveEntry {
    /// Next chunk of the entry's bytes; `None` once the entry is complete.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.chunks
            .recv()
            .await
            .map(|chunk| chunk.map_err(PipelineError::from))
    }
}

/// Totals of a fully read archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub skipped: usize,
}

/// Decoder-side handle used by the format readers.
pub(crate) struct EntrySink {
    object: String,
    entries: mpsc::Sender<ArchiveEntry>,
    summary: ArchiveSummary,
}

impl EntrySink {
    fn skip(&mut self, name: &str, why: &str) {
        debug!(entry = %name, why, "Skipping non-regular archive entry");
        self.summary.skipped += 1;
    }

    /// Stream one entry of `expected` bytes to the consumer. `classify` turns
    /// read errors into failures; it differs between formats.
    ///
    /// An entry that ends short is failed on its chunk stream, so the writer
    /// aborts instead of finalizing a partial object.
    fn emit(
        &mut self,
        name: String,
        expected: u64,
        reader: &mut dyn Read,
        classify: &dyn Fn(std::io::Error) -> ArchiveFailure,
    ) -> std::result::Result<u64, ArchiveFailure> {
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        self.entries
            .blocking_send(ArchiveEntry {
                name: name.clone(),
                chunks: rx,
            })
            .map_err(|_| ArchiveFailure::abandoned(&self.object))?;
        self.summary.entries += 1;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) if total < expected => {
                    let failure = ArchiveFailure::format(
                        &self.object,
                        format!("entry {} truncated: {} of {} bytes", name, total, expected),
                    );
                    let _ = tx.blocking_send(Err(failure.clone()));
                    return Err(failure);
                },
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let failure = classify(e);
                    // The writer may already be gone; the failure is also
                    // reported by the reader task.
                    let _ = tx.blocking_send(Err(failure.clone()));
                    return Err(failure);
                },
            };
            total += n as u64;
            tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                .map_err(|_| ArchiveFailure::abandoned(&self.object))?;
        }
    }
}

/// Lazily yields the regular entries of one archive object.
pub struct ArchiveReader {
    object: String,
    entries: mpsc::Receiver<ArchiveEntry>,
    task: JoinHandle<std::result::Result<ArchiveSummary, ArchiveFailure>>,
    stop: CancellationToken,
}

impl ArchiveReader {
    /// Start decoding. Must be called from within the tokio runtime.
    ///
    /// `declared_size` overrides the size reported by the store; the zip
    /// reader pre-sizes its buffer with it and treats a mismatch as a
    /// truncated read.
    pub fn open(
        kind: ArchiveKind,
        source: &SourceReference,
        reader: ObjectReader,
        declared_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Self {
        let object = source.uri();
        let stop = cancel.child_token();
        let declared_size = declared_size.or(reader.size);
        let bridge = SyncIoBridge::new(CancellableRead::new(reader.body, stop.clone()));
        let (tx, rx) = mpsc::channel(1);

        let sink = EntrySink {
            object: object.clone(),
            entries: tx,
            summary: ArchiveSummary::default(),
        };
        debug!(object = %object, %kind, ?declared_size, "Opening archive");

        let task = tokio::task::spawn_blocking(move || match kind {
            ArchiveKind::TarGz => tar_gz::read(bridge, sink),
            ArchiveKind::Zip => zip_archive::read(bridge, declared_size, sink),
        });

        Self {
            object,
            entries: rx,
            task,
            stop,
        }
    }

    /// Next regular entry, or `None` when the archive is exhausted or broken.
    /// Call [`ArchiveReader::finish`] afterwards to learn which.
    pub async fn next_entry(&mut self) -> Option<ArchiveEntry> {
        self.entries.recv().await
    }

    /// Wait for the decoder and report how reading ended.
    pub async fn finish(self) -> Result<ArchiveSummary> {
        drop(self.entries);
        match self.task.await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(failure)) => Err(failure.into()),
            Err(join) => Err(PipelineError::ArchiveFormat {
                object: self.object,
                cause: anyhow::anyhow!("decoder task failed: {}", join),
            }),
        }
    }

    /// Stop decoding early and wait for the decoder thread to exit.
    pub async fn abandon(self) {
        self.stop.cancel();
        let object = self.object.clone();
        if let Err(err) = self.finish().await {
            debug!(object = %object, error = %err, "Archive reader stopped early");
        }
    }
}

/// Query-unescape a zip member name: `+` becomes a space, then `%XX`
/// escapes are decoded (so `%2B` still yields a literal `+`).
pub(crate) fn decode_entry_name(raw: &str) -> std::result::Result<String, String> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|name| name.into_owned())
        .map_err(|e| format!("entry name {:?} is not valid UTF-8 once decoded: {}", raw, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_kind() {
        assert_eq!(ArchiveKind::detect("logs/a.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("a.ZIP"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("a.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("test.zip/test.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("a.csv"), None);
    }

    #[test]
    fn test_decode_entry_name() {
        assert_eq!(decode_entry_name("a%20b.csv").unwrap(), "a b.csv");
        assert_eq!(decode_entry_name("a+b.csv").unwrap(), "a b.csv");
        assert_eq!(decode_entry_name("a%2Bb.csv").unwrap(), "a+b.csv");
        assert_eq!(decode_entry_name("dir/%E3%83%AD%E3%82%B0.txt").unwrap(), "dir/ログ.txt");
        assert!(decode_entry_name("bad%FF.csv").is_err());
    }

    #[test]
    fn test_failure_classification() {
        let flag = AtomicBool::new(false);
        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt deflate stream");
        let failure = ArchiveFailure::classify("gs://b/a.tgz", &flag, err);
        assert!(matches!(
            PipelineError::from(failure),
            PipelineError::ArchiveFormat { .. }
        ));

        flag.store(true, Ordering::Relaxed);
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let failure = ArchiveFailure::classify("gs://b/a.tgz", &flag, err);
        assert!(matches!(PipelineError::from(failure), PipelineError::SourceIo { .. }));
    }
}
