//! Error taxonomy for listing reconciliation.
//!
//! Per-candidate errors ([`CandidateError`]) are collected and reported once a
//! run completes. Whether one of them stops the whole run depends on where the
//! candidate came from, see [`CandidateError::aborts`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The archive container itself could not be read.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt archive: {0}")]
    Corrupt(#[from] zip::result::ZipError),

    #[error("corrupt archive: failed to decompress '{entry}': {source}")]
    Decompress {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt archive: '{entry}' claims {size} bytes, more than the {limit} allowed")]
    EntryTooLarge { entry: String, size: u64, limit: u64 },
}

/// Which half of a package identity disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Id,
    Version,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityField::Id => write!(f, "id"),
            IdentityField::Version => write!(f, "version"),
        }
    }
}

/// The manifest inside an archive was unusable or named the wrong package.
#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error(
        "identity mismatch: the archive manifest {field} is '{found}', which does not match the declared {field} '{declared}'"
    )]
    IdentityMismatch {
        field: IdentityField,
        declared: String,
        found: String,
    },
}

/// A failure while verifying a single candidate archive.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("transport failure fetching {url}: {source:#}")]
    TransportFailure {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    CorruptArchive(#[from] ArchiveError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl CandidateError {
    /// Whether this error stops the run when it happens to an explicitly
    /// declared release. Repository assets never abort a run.
    pub fn aborts(&self, explicit: bool) -> bool {
        explicit && !matches!(self, CandidateError::CorruptArchive(_))
    }
}

/// A discovery-time failure that affects a single `githubRepos` entry.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid repository reference '{0}': expected 'owner/name'")]
    InvalidRepoReference(String),

    #[error("transport failure listing releases of {repo}: {source:#}")]
    TransportFailure {
        repo: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The listing source or existing index could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "could not find a listing source at {source_path} or a package manifest at {}; at least one is required",
        display_optional_path(.manifest_path)
    )]
    MissingSource {
        source_path: PathBuf,
        manifest_path: Option<PathBuf>,
    },

    #[error("failed to read {path}: {source:#}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Unparsable {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "the listing has no id and none can be generated without a repository reference; set \"id\" in the listing source or pass --listing-id"
    )]
    MissingListingId,

    #[error(transparent)]
    InvalidRepository(#[from] DiscoveryError),
}

/// A hard abort: the run stops and nothing is written.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(
        "aborting: declared release {url}{} could not be published: {source}",
        describe_declared(.declared_id, .declared_version)
    )]
    Aborted {
        url: String,
        declared_id: Option<String>,
        declared_version: Option<String>,
        #[source]
        source: CandidateError,
    },
}

fn describe_declared(id: &Option<String>, version: &Option<String>) -> String {
    match (id, version) {
        (Some(id), Some(version)) => format!(" ({} {})", id, version),
        (Some(id), None) => format!(" ({})", id),
        (None, Some(version)) => format!(" (version {})", version),
        (None, None) => String::new(),
    }
}

fn display_optional_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "(none configured)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_archive_never_aborts() {
        let err = CandidateError::CorruptArchive(ArchiveError::Corrupt(
            zip::result::ZipError::InvalidArchive("bad".into()),
        ));
        assert!(!err.aborts(true));
        assert!(!err.aborts(false));
    }

    #[test]
    fn test_identity_mismatch_aborts_only_when_explicit() {
        let err = CandidateError::Manifest(ManifestError::IdentityMismatch {
            field: IdentityField::Id,
            declared: "b".into(),
            found: "a".into(),
        });
        assert!(err.aborts(true));
        assert!(!err.aborts(false));
    }

    #[test]
    fn test_transport_failure_aborts_only_when_explicit() {
        let err = CandidateError::TransportFailure {
            url: "https://example.com/p.zip".into(),
            source: anyhow::anyhow!("404"),
        };
        assert!(err.aborts(true));
        assert!(!err.aborts(false));
    }

    #[test]
    fn test_aborted_message_carries_declared_identity() {
        let err = ReconcileError::Aborted {
            url: "https://example.com/p.zip".into(),
            declared_id: Some("com.example.p".into()),
            declared_version: Some("3.0.0".into()),
            source: CandidateError::Manifest(ManifestError::IdentityMismatch {
                field: IdentityField::Version,
                declared: "3.0.0".into(),
                found: "2.9.9".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/p.zip"));
        assert!(msg.contains("(com.example.p 3.0.0)"));
        assert!(msg.contains("'2.9.9'"));
    }

    #[test]
    fn test_missing_source_message() {
        let err = ConfigError::MissingSource {
            source_path: PathBuf::from("source.json"),
            manifest_path: None,
        };
        assert!(err.to_string().contains("source.json"));
        assert!(err.to_string().contains("(none configured)"));
    }
}
