//! gzip-compressed tar, decoded in a single streaming pass

use super::io::SourceTap;
use super::{ArchiveFailure, ArchiveSummary, EntrySink};
use flate2::read::GzDecoder;
use std::io::Read;

pub(super) fn read(source: impl Read, mut sink: EntrySink) -> Result<ArchiveSummary, ArchiveFailure> {
    let object = sink.object.clone();
    let (tap, source_failed) = SourceTap::new(source);
    let classify = |err: std::io::Error| ArchiveFailure::classify(&object, &source_failed, err);

    let mut archive = tar::Archive::new(GzDecoder::new(tap));
    let entries = archive.entries().map_err(classify)?;

    for entry in entries {
        let mut entry = entry.map_err(classify)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        if !entry_type.is_file() {
            sink.skip(&name, "not a regular file");
            continue;
        }

        let expected = entry.size();
        sink.emit(name, expected, &mut entry, &classify)?;
    }

    Ok(sink.summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::{ArchiveKind, ArchiveReader};
    use crate::storage::ObjectReader;
    use flate2::{write::GzEncoder, Compression};
    use logload_common::{types::SourceReference, PipelineError};
    use std::io::Cursor;
    use tokio_util::sync::CancellationToken;

    fn tar_gz(build: impl FnOnce(&mut tar::Builder<GzEncoder<Vec<u8>>>)) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        build(&mut builder);
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn add_file(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    async fn read_all(bytes: Vec<u8>) -> (Vec<(String, Vec<u8>)>, logload_common::Result<super::ArchiveSummary>) {
        let source = SourceReference::new("src", "a.tgz");
        let reader = ObjectReader {
            size: Some(bytes.len() as u64),
            body: Box::pin(Cursor::new(bytes)),
        };
        let mut archive =
            ArchiveReader::open(ArchiveKind::TarGz, &source, reader, None, &CancellationToken::new());

        let mut out = Vec::new();
        while let Some(mut entry) = archive.next_entry().await {
            let mut data = Vec::new();
            while let Some(chunk) = entry.next_chunk().await {
                match chunk {
                    Ok(chunk) => data.extend_from_slice(&chunk),
                    Err(_) => break,
                }
            }
            out.push((entry.name.clone(), data));
        }
        (out, archive.finish().await)
    }

    #[tokio::test]
    async fn test_regular_entries_in_order_others_skipped() {
        let bytes = tar_gz(|b| {
            add_file(b, "a.log", b"first");
            let mut dir = tar::Header::new_gnu();
            dir.set_entry_type(tar::EntryType::Directory);
            dir.set_size(0);
            dir.set_mode(0o755);
            dir.set_cksum();
            b.append_data(&mut dir, "sub/", std::io::empty()).unwrap();
            add_file(b, "sub/b.log", b"second");
            let mut link = tar::Header::new_gnu();
            link.set_entry_type(tar::EntryType::Symlink);
            link.set_size(0);
            link.set_cksum();
            b.append_link(&mut link, "latest.log", "a.log").unwrap();
        });

        let (entries, summary) = read_all(bytes).await;
        let summary = summary.unwrap();

        assert_eq!(
            entries,
            vec![
                ("a.log".to_string(), b"first".to_vec()),
                ("sub/b.log".to_string(), b"second".to_vec()),
            ]
        );
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn test_entry_larger_than_one_chunk() {
        let big: Vec<u8> = (0..(super::super::CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let bytes = tar_gz(|b| add_file(b, "big.log", &big));

        let (entries, summary) = read_all(bytes).await;
        summary.unwrap();
        assert_eq!(entries[0].1, big);
    }

    #[tokio::test]
    async fn test_truncated_entry_fails_its_chunk_stream() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(1000);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "a.log", &[b'l'; 1000][..]).unwrap();
        let mut tar = builder.into_inner().unwrap();
        tar.truncate(512 + 300);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, &tar).unwrap();

        let source = SourceReference::new("src", "t.tgz");
        let bytes = encoder.finish().unwrap();
        let reader = ObjectReader {
            size: Some(bytes.len() as u64),
            body: Box::pin(Cursor::new(bytes)),
        };
        let mut archive =
            ArchiveReader::open(ArchiveKind::TarGz, &source, reader, None, &CancellationToken::new());

        let mut entry = archive.next_entry().await.unwrap();
        let mut received = 0;
        let mut last = None;
        while let Some(chunk) = entry.next_chunk().await {
            match chunk {
                Ok(chunk) => received += chunk.len(),
                Err(err) => last = Some(err),
            }
        }
        assert_eq!(received, 300);
        assert!(matches!(last, Some(PipelineError::ArchiveFormat { .. })));
        assert!(matches!(
            archive.finish().await,
            Err(PipelineError::ArchiveFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_gzip_is_format_error() {
        let (entries, summary) = read_all(b"definitely not gzip".to_vec()).await;
        assert!(entries.is_empty());
        assert!(matches!(summary, Err(PipelineError::ArchiveFormat { .. })));
    }

    #[tokio::test]
    async fn test_gzip_of_non_tar_is_format_error() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, &[0x5a; 1024]).unwrap();
        let bytes = encoder.finish().unwrap();

        let (_, summary) = read_all(bytes).await;
        assert!(matches!(summary, Err(PipelineError::ArchiveFormat { .. })));
    }
}
