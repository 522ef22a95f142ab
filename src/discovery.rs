//! Enumerating candidate release archives from a listing source.

use futures_util::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;

use crate::archive::is_package_archive;
use crate::error::DiscoveryError;
use crate::listing::ListingSource;
use crate::source::{ReleaseAsset, ReleaseSource, RepoId, SourceRelease};

/// Where a candidate was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOrigin {
    /// Named in the listing source under `packages`.
    Explicit { package_id: String },
    /// An asset on a release of a linked repository.
    Repository { repo: RepoId, release: String },
}

/// A not-yet-verified reference to a package archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub archive_url: String,
    pub declared_id: Option<String>,
    pub declared_version: Option<String>,
    pub origin: CandidateOrigin,
}

impl Candidate {
    pub fn is_explicit(&self) -> bool {
        matches!(self.origin, CandidateOrigin::Explicit { .. })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            CandidateOrigin::Explicit { package_id } => {
                write!(f, "{} (declared for {})", self.archive_url, package_id)
            }
            CandidateOrigin::Repository { repo, release } => {
                write!(f, "{} (release {} of {})", self.archive_url, release, repo)
            }
        }
    }
}

/// Which assets of a release look like package archives.
#[derive(Debug, PartialEq)]
pub enum ArchiveAssets<'a> {
    NoArchive,
    Single(&'a ReleaseAsset),
    /// Sorted by asset name.
    Multiple(Vec<&'a ReleaseAsset>),
}

impl<'a> ArchiveAssets<'a> {
    pub fn into_vec(self) -> Vec<&'a ReleaseAsset> {
        match self {
            ArchiveAssets::NoArchive => Vec::new(),
            ArchiveAssets::Single(asset) => vec![asset],
            ArchiveAssets::Multiple(assets) => assets,
        }
    }
}

pub fn select_archive_assets(assets: &[ReleaseAsset]) -> ArchiveAssets<'_> {
    let mut archives: Vec<&ReleaseAsset> = assets
        .iter()
        .filter(|asset| is_package_archive(&asset.name))
        .collect();
    archives.sort_by(|a, b| a.name.cmp(&b.name).then(a.download_url.cmp(&b.download_url)));

    match archives.len() {
        0 => ArchiveAssets::NoArchive,
        1 => ArchiveAssets::Single(archives[0]),
        _ => ArchiveAssets::Multiple(archives),
    }
}

/// A `githubRepos` entry that produced no candidates because of an error.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub reference: String,
    pub error: DiscoveryError,
}

/// Everything discovery found.
#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    pub failures: Vec<DiscoveryFailure>,
    /// Releases that carried no package archive.
    pub releases_without_archives: usize,
}

/// Candidates declared under `packages`, in document order.
pub fn explicit_candidates(listing: &ListingSource) -> Vec<Candidate> {
    listing
        .packages
        .iter()
        .flat_map(|package| {
            let declared_id = Some(package.id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string);

            package.releases.iter().map(move |release| Candidate {
                archive_url: release.url.clone(),
                declared_id: declared_id.clone(),
                declared_version: release.version.clone(),
                origin: CandidateOrigin::Explicit {
                    package_id: package.id.clone(),
                },
            })
        })
        .collect()
}

/// Candidates for every package archive attached to `releases`, plus the
/// number of releases that had none.
pub fn repository_candidates(repo: &RepoId, releases: &[SourceRelease]) -> (Vec<Candidate>, usize) {
    let mut candidates = Vec::new();
    let mut without_archives = 0;

    for release in releases {
        let assets = select_archive_assets(&release.assets);
        match &assets {
            ArchiveAssets::NoArchive => {
                info!(
                    "Release {} of {} has no package archive, skipping",
                    release.label(),
                    repo
                );
                without_archives += 1;
            }
            ArchiveAssets::Single(asset) => {
                debug!("Release {} of {}: found {}", release.label(), repo, asset.name);
            }
            ArchiveAssets::Multiple(found) => {
                warn!(
                    "Release {} of {} has {} package archives, checking all of them: {}",
                    release.label(),
                    repo,
                    found.len(),
                    found
                        .iter()
                        .map(|a| a.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }

        candidates.extend(assets.into_vec().into_iter().map(|asset| Candidate {
            archive_url: asset.download_url.clone(),
            declared_id: None,
            declared_version: None,
            origin: CandidateOrigin::Repository {
                repo: repo.clone(),
                release: release.label().to_string(),
            },
        }));
    }

    (candidates, without_archives)
}

/// Enumerate every candidate archive the listing source points at.
///
/// Release listings of linked repositories are fetched concurrently, at most
/// `concurrency` at a time. A broken repository reference only affects its
/// own entry.
#[tracing::instrument(skip(listing, source))]
pub async fn discover<S: ReleaseSource + ?Sized>(
    listing: &ListingSource,
    source: &S,
    concurrency: usize,
) -> Discovery {
    let mut discovery = Discovery {
        candidates: explicit_candidates(listing),
        ..Default::default()
    };

    let lookups: Vec<(String, Result<RepoId, DiscoveryError>)> = listing
        .github_repos
        .iter()
        .map(|reference| (reference.clone(), reference.parse::<RepoId>()))
        .collect();

    let results: Vec<_> = stream::iter(lookups)
        .map(|(reference, parsed)| async move {
            let result = match parsed {
                Ok(repo) => {
                    info!("Listing releases of {}", repo);
                    source
                        .get_releases(&repo)
                        .await
                        .map(|releases| (repo.clone(), releases))
                        .map_err(|source| DiscoveryError::TransportFailure {
                            repo: repo.to_string(),
                            source,
                        })
                }
                Err(e) => Err(e),
            };
            (reference, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    for (reference, result) in results {
        match result {
            Ok((repo, releases)) => {
                if releases.is_empty() {
                    info!("Found no releases for {}", repo);
                }
                let (candidates, without_archives) = repository_candidates(&repo, &releases);
                discovery.candidates.extend(candidates);
                discovery.releases_without_archives += without_archives;
            }
            Err(error) => {
                error!("Skipping repository '{}': {}", reference, error);
                discovery.failures.push(DiscoveryFailure { reference, error });
            }
        }
    }

    discovery.candidates = dedup_by_url(discovery.candidates);
    discovery
}

/// Collapse candidates that point at the same archive. An explicit
/// declaration replaces a repository asset at the same URL so its declared
/// identity is still checked; explicit declarations that disagree on the
/// identity are all kept.
fn dedup_by_url(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();

    for candidate in candidates {
        let Some(indices) = positions.get_mut(&candidate.archive_url) else {
            positions.insert(candidate.archive_url.clone(), vec![kept.len()]);
            kept.push(candidate);
            continue;
        };

        if !candidate.is_explicit() {
            debug!("Ignoring duplicate reference to {}", candidate.archive_url);
        } else if !kept[indices[0]].is_explicit() {
            kept[indices[0]] = candidate;
        } else if indices.iter().any(|&i| same_declaration(&kept[i], &candidate)) {
            debug!("Ignoring duplicate declaration of {}", candidate);
        } else {
            warn!(
                "{} is declared more than once with different identities, each one will be checked",
                candidate.archive_url
            );
            indices.push(kept.len());
            kept.push(candidate);
        }
    }

    kept
}

fn same_declaration(a: &Candidate, b: &Candidate) -> bool {
    a.declared_id == b.declared_id && a.declared_version == b.declared_version
}
