//! The listing source document and how it is loaded.

use log::{info, warn};
use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;
use crate::index::INDEX_FILENAME;
use crate::manifest::{Author, PackageManifest, null_as_default};
use crate::runtime::Runtime;
use crate::source::RepoId;

/// Default file name of the listing source.
pub const SOURCE_FILENAME: &str = "source.json";

/// Banner assumed for listings synthesized from a package manifest.
const FALLBACK_BANNER: &str = "banner.png";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct InfoLink {
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
}

/// The declarative description of a listing: its metadata, explicitly
/// declared package releases and linked repositories.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingSource {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub author: Author,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    pub description: Option<String>,
    pub banner_url: Option<String>,
    pub info_link: Option<InfoLink>,
    #[serde(deserialize_with = "null_as_default")]
    pub packages: Vec<PackageInfo>,
    #[serde(deserialize_with = "null_as_default")]
    pub github_repos: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PackageInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub releases: Vec<ReleaseRef>,
}

/// An explicitly declared release archive, optionally pinned to a version.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "RawReleaseRef")]
pub struct ReleaseRef {
    pub url: String,
    pub version: Option<String>,
}

/// Older listings use bare URL strings, newer ones `{url, version}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawReleaseRef {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl From<RawReleaseRef> for ReleaseRef {
    fn from(raw: RawReleaseRef) -> Self {
        match raw {
            RawReleaseRef::Url(url) => ReleaseRef { url, version: None },
            RawReleaseRef::Detailed { url, version } => ReleaseRef {
                url,
                version: version.filter(|v| !v.trim().is_empty()),
            },
        }
    }
}

/// Values passed on the command line that win over the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingOverrides {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
}

impl ListingOverrides {
    pub fn apply(&self, listing: &mut ListingSource) {
        if let Some(id) = &self.id {
            listing.id = id.clone();
        }
        if let Some(name) = &self.name {
            listing.name = name.clone();
        }
        if let Some(url) = &self.url {
            listing.url = url.clone();
        }
    }
}

impl ListingSource {
    /// Parse a listing source document.
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        serde_json::from_str(text).map_err(|source| ConfigError::Unparsable {
            origin: origin.to_string(),
            source,
        })
    }

    /// Read and parse the listing source at `path`.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self, ConfigError> {
        let text = runtime
            .read_to_string(path)
            .map_err(|source| ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Synthesize a single-package listing from that package's manifest.
    pub fn from_manifest(
        manifest: &PackageManifest,
        listing_url: Option<&str>,
        repository: Option<&RepoId>,
    ) -> Self {
        let display_name = manifest
            .display_name
            .clone()
            .unwrap_or_else(|| manifest.id.clone());

        ListingSource {
            name: format!("{} Listing", display_name),
            id: format!("{}.listing", manifest.id),
            author: manifest.author.clone().unwrap_or_default(),
            url: listing_url.unwrap_or_default().to_string(),
            description: Some(format!("Listing for {}", display_name)),
            banner_url: Some(FALLBACK_BANNER.to_string()),
            info_link: None,
            packages: Vec::new(),
            github_repos: repository.map(|r| r.to_string()).into_iter().collect(),
        }
    }

    /// Fill in a blank listing id from the repository reference.
    pub fn ensure_id(&mut self, repository: Option<&RepoId>) -> Result<(), ConfigError> {
        if !self.id.trim().is_empty() {
            return Ok(());
        }

        let repo = repository.ok_or(ConfigError::MissingListingId)?;
        self.id = format!("io.github.{}.{}", repo.owner, repo.repo);
        warn!(
            "Your listing needs an id. An id has been generated for you: {}. Set \"id\" in the listing source to change it.",
            self.id
        );
        Ok(())
    }

    pub fn author_name(&self) -> &str {
        self.author.name.as_deref().unwrap_or_default()
    }
}

/// Where GitHub Pages serves the index built for `repo`.
pub fn published_url(repo: &RepoId) -> String {
    format!(
        "https://{}.github.io/{}/{}",
        repo.owner, repo.repo, INDEX_FILENAME
    )
}

/// Locate the listing source, falling back to a package manifest when the
/// source document does not exist.
#[tracing::instrument(skip(runtime))]
pub fn resolve<R: Runtime>(
    runtime: &R,
    source_path: &Path,
    manifest_path: Option<&Path>,
    listing_url: Option<&str>,
    repository: Option<&RepoId>,
) -> Result<ListingSource, ConfigError> {
    if runtime.exists(source_path) {
        info!("Reading listing source from {}", source_path.display());
        return ListingSource::load(runtime, source_path);
    }

    let Some(manifest_path) = manifest_path.filter(|p| runtime.exists(p)) else {
        return Err(ConfigError::MissingSource {
            source_path: source_path.to_path_buf(),
            manifest_path: manifest_path.map(Path::to_path_buf),
        });
    };

    info!(
        "No listing source at {}, building one from {}",
        source_path.display(),
        manifest_path.display()
    );

    let raw = runtime
        .read_to_string(manifest_path)
        .map_err(|source| ConfigError::Unreadable {
            path: manifest_path.to_path_buf(),
            source,
        })?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
    let manifest: PackageManifest =
        serde_json::from_str(raw).map_err(|source| ConfigError::Unparsable {
            origin: manifest_path.display().to_string(),
            source,
        })?;

    Ok(ListingSource::from_manifest(
        &manifest,
        listing_url,
        repository,
    ))
}
