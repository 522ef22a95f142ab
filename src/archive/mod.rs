mod zip;

use crate::error::ArchiveError;

pub use self::zip::ZipReader;

/// Reads a single named entry out of an in-memory archive.
pub trait ArchiveReader: Send + Sync {
    /// Check if this reader can handle an archive with the given file name
    fn can_handle(&self, name: &str) -> bool;

    /// Return the decompressed bytes of `entry`, or `None` when the archive
    /// has no such entry.
    fn read_entry(&self, bytes: &[u8], entry: &str) -> Result<Option<Vec<u8>>, ArchiveError>;
}

/// Returns true when a release asset name looks like a package archive.
pub fn is_package_archive(name: &str) -> bool {
    ZipReader.can_handle(name)
}

/// Extract one entry from package archive bytes.
///
/// A missing entry is `Ok(None)`, not an error: callers treat it as "this is
/// not a package archive". Only an unreadable container is an error.
#[tracing::instrument(skip(bytes), fields(size = bytes.len()))]
pub fn extract(bytes: &[u8], entry: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    ZipReader.read_entry(bytes, entry)
}
