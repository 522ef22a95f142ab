use log::debug;
use std::io::{Cursor, Read};
use zip::ZipArchive;

use super::ArchiveReader;
use crate::error::ArchiveError;

/// Reader for .zip archives
pub struct ZipReader;

impl ArchiveReader for ZipReader {
    fn can_handle(&self, name: &str) -> bool {
        name.to_lowercase().ends_with(".zip")
    }

    fn read_entry(&self, bytes: &[u8], entry: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        read_entry_limited(bytes, entry, MAX_ENTRY_SIZE)
    }
}

/// Largest entry read out of an archive. Manifests are a few kilobytes.
const MAX_ENTRY_SIZE: u64 = 16 << 20;

fn read_entry_limited(
    bytes: &[u8],
    entry: &str,
    limit: u64,
) -> Result<Option<Vec<u8>>, ArchiveError> {
    // Opening reads the central directory only; entry data is left alone
    // until we ask for it.
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let stored_name = if archive.index_for_name(entry).is_some() {
        Some(entry.to_string())
    } else {
        archive
            .file_names()
            .find(|name| normalize(name) == entry)
            .map(str::to_owned)
    };

    let Some(stored_name) = stored_name else {
        debug!("No '{}' among {} zip entries", entry, archive.len());
        return Ok(None);
    };

    let mut file = archive.by_name(&stored_name)?;
    if file.is_dir() {
        return Ok(None);
    }

    if file.size() > limit {
        return Err(ArchiveError::EntryTooLarge {
            entry: stored_name,
            size: file.size(),
            limit,
        });
    }

    // The stored size is not trusted for the read itself either.
    let mut buffer = Vec::with_capacity(file.size() as usize);
    (&mut file)
        .take(limit + 1)
        .read_to_end(&mut buffer)
        .map_err(|source| ArchiveError::Decompress {
            entry: stored_name.clone(),
            source,
        })?;
    if buffer.len() as u64 > limit {
        return Err(ArchiveError::EntryTooLarge {
            entry: stored_name,
            size: buffer.len() as u64,
            limit,
        });
    }

    debug!("Read {} bytes from '{}'", buffer.len(), stored_name);
    Ok(Some(buffer))
}

/// Some packers store root entries as "./package.json" or "/package.json".
fn normalize(name: &str) -> &str {
    name.trim_start_matches("./").trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::zip_bytes;
    use std::io::Write;
    use zip::CompressionMethod;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_can_handle_zip() {
        let reader = ZipReader;
        assert!(reader.can_handle("file.zip"));
        assert!(reader.can_handle("FILE.ZIP"));
        assert!(!reader.can_handle("file.tar.gz"));
        assert!(!reader.can_handle("file.zip.sha256"));
    }

    #[test]
    fn test_read_entry_regardless_of_position() {
        let bytes = zip_bytes(&[
            ("Editor/Tool.cs", "class Tool {}"),
            ("Runtime/Thing.cs", "class Thing {}"),
            ("package.json", r#"{"name":"a"}"#),
        ]);

        let entry = ZipReader.read_entry(&bytes, "package.json").unwrap();
        assert_eq!(entry, Some(br#"{"name":"a"}"#.to_vec()));
    }

    #[test]
    fn test_read_entry_with_dot_slash_prefix() {
        let bytes = zip_bytes(&[("./package.json", "{}")]);
        let entry = ZipReader.read_entry(&bytes, "package.json").unwrap();
        assert_eq!(entry, Some(b"{}".to_vec()));
    }

    #[test]
    fn test_read_entry_does_not_match_nested_file() {
        let bytes = zip_bytes(&[("Samples/package.json", "{}")]);
        assert_eq!(ZipReader.read_entry(&bytes, "package.json").unwrap(), None);
    }

    #[test]
    fn test_read_entry_from_empty_archive() {
        let bytes = zip_bytes(&[]);
        assert_eq!(ZipReader.read_entry(&bytes, "package.json").unwrap(), None);
    }

    #[test]
    fn test_read_entry_stored_uncompressed() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file("package.json", options).unwrap();
        zip.write_all(b"{\"name\":\"stored\"}").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let entry = ZipReader.read_entry(&bytes, "package.json").unwrap();
        assert_eq!(entry, Some(b"{\"name\":\"stored\"}".to_vec()));
    }

    #[test]
    fn test_directory_entry_is_not_a_match() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_directory("package.json/", options).unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        assert_eq!(ZipReader.read_entry(&bytes, "package.json").unwrap(), None);
    }

    /// Rewrites the uncompressed size recorded in the central directory.
    fn with_claimed_size(mut bytes: Vec<u8>, size: u32) -> Vec<u8> {
        let header = bytes
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        bytes[header + 24..header + 28].copy_from_slice(&size.to_le_bytes());
        bytes
    }

    #[test]
    fn test_read_entry_rejects_huge_claimed_size() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file("package.json", options).unwrap();
        zip.write_all(br#"{"name":"p","version":"1.0.0"}"#).unwrap();
        let bytes = with_claimed_size(zip.finish().unwrap().into_inner(), 0xFFFF_FFF0);

        let err = ZipReader.read_entry(&bytes, "package.json").unwrap_err();
        assert!(matches!(
            &err,
            ArchiveError::EntryTooLarge { size, .. } if *size == 0xFFFF_FFF0
        ));
        assert!(!crate::error::CandidateError::from(err).aborts(true));
    }

    #[test]
    fn test_read_entry_stops_at_limit() {
        let bytes = zip_bytes(&[("package.json", "0123456789")]);

        let err = read_entry_limited(&bytes, "package.json", 4).unwrap_err();
        assert!(matches!(err, ArchiveError::EntryTooLarge { limit: 4, .. }));

        let entry = read_entry_limited(&bytes, "package.json", 10).unwrap();
        assert_eq!(entry, Some(b"0123456789".to_vec()));
    }

    #[test]
    fn test_read_entry_corrupted_archive() {
        let result = ZipReader.read_entry(b"corrupted data", "package.json");
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
    }

    #[test]
    fn test_read_entry_truncated_archive() {
        let bytes = zip_bytes(&[("package.json", "{}")]);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(ZipReader.read_entry(truncated, "package.json").is_err());
    }
}
