//! Release listings from a source-hosting service.
//!
//! Only GitHub is implemented; the [`ReleaseSource`] trait is the seam that
//! discovery is written against so it can be tested without the network.

mod github;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DiscoveryError;

pub use github::{DEFAULT_API_URL, GitHubSource};

/// Repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            Err(DiscoveryError::InvalidRepoReference(s.to_string()))
        } else {
            Ok(RepoId {
                owner: parts[0].to_string(),
                repo: parts[1].to_string(),
            })
        }
    }
}

/// A downloadable asset from a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    pub download_url: String,
}

/// A release from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceRelease {
    /// Version tag (e.g., "v1.0.0")
    pub tag: String,
    /// Release name/title
    pub name: Option<String>,
    pub assets: Vec<ReleaseAsset>,
}

impl SourceRelease {
    /// Name used in logs: the release title when set, else the tag.
    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.tag,
        }
    }
}

/// Anything that can list the releases of a repository.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch all releases for a repository.
    async fn get_releases(&self, repo: &RepoId) -> Result<Vec<SourceRelease>>;
}
