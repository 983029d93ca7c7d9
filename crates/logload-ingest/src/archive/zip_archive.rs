//! zip, read from a fully buffered copy of the object

use super::{decode_entry_name, ArchiveFailure, ArchiveSummary, EntrySink};
use std::io::{Cursor, Read};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Upper bound on the up-front buffer reservation.
const MAX_PREALLOC: usize = 1 << 30;

pub(super) fn read(
    mut source: impl Read,
    declared_size: Option<u64>,
    mut sink: EntrySink,
) -> Result<ArchiveSummary, ArchiveFailure> {
    let object = sink.object.clone();

    // The central directory sits at the end, so the whole object is needed.
    let capacity = declared_size
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(0)
        .min(MAX_PREALLOC);
    let mut buffer = Vec::with_capacity(capacity);
    source
        .read_to_end(&mut buffer)
        .map_err(|e| ArchiveFailure::source(&object, e))?;

    if let Some(expected) = declared_size {
        if buffer.len() as u64 != expected {
            return Err(ArchiveFailure::source(
                &object,
                format!("read {} bytes, object size is {}", buffer.len(), expected),
            ));
        }
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(buffer))
        .map_err(|e| ArchiveFailure::format(&object, e))?;
    // Everything is in memory now; read errors can only mean a bad archive.
    let classify = |err: std::io::Error| ArchiveFailure::format(&object, err);

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| ArchiveFailure::format(&object, format!("entry {}: {}", index, e)))?;
        let raw_name = file.name().to_string();

        if file.is_dir() {
            sink.skip(&raw_name, "directory");
            continue;
        }
        if file.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            sink.skip(&raw_name, "symlink");
            continue;
        }

        let name = decode_entry_name(&raw_name).map_err(|e| ArchiveFailure::format(&object, e))?;
        let expected = file.size();
        sink.emit(name, expected, &mut file, &classify)?;
    }

    Ok(sink.summary)
}
