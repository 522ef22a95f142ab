//! Fetching, verifying and deduplicating candidate archives.
//!
//! Candidates are processed by a bounded pool of concurrent downloads. The
//! pool only produces results; a single loop consumes them and owns all of
//! the accepted state, so the outcome does not depend on completion order.

use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::archive;
use crate::discovery::Candidate;
use crate::download::Downloader;
use crate::error::{CandidateError, ReconcileError};
use crate::hash::fingerprint;
use crate::index::ExistingIndex;
use crate::manifest::{self, MANIFEST_ENTRY, PackageDescriptor};

/// Default number of archives fetched at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// What a completed run produced.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// New descriptors, ordered by identity.
    pub accepted: Vec<PackageDescriptor>,
    pub skipped: usize,
    /// Per-candidate failures that did not stop the run, ordered by URL.
    pub failed: Vec<(Candidate, CandidateError)>,
    /// Number of archives downloaded.
    pub fetched: usize,
}

pub struct Reconciler<'a, D: Downloader + ?Sized> {
    downloader: &'a D,
    existing: &'a ExistingIndex,
    concurrency: usize,
}

impl<'a, D: Downloader + ?Sized> Reconciler<'a, D> {
    pub fn new(downloader: &'a D, existing: &'a ExistingIndex) -> Self {
        Self {
            downloader,
            existing,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Verify every candidate not already published.
    ///
    /// Stops at the first failure of an explicitly declared release; the
    /// downloads still in flight are dropped.
    #[tracing::instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn reconcile(
        &self,
        candidates: Vec<Candidate>,
    ) -> Result<Reconciliation, ReconcileError> {
        let mut outcome = Reconciliation::default();

        let mut pending = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.existing.contains_url(&candidate.archive_url) {
                info!(
                    "Current listing already contains {}, skipping",
                    candidate.archive_url
                );
                outcome.skipped += 1;
            } else {
                pending.push(candidate);
            }
        }

        let mut results = stream::iter(pending)
            .map(|candidate| async move {
                let result = self.process(&candidate).await;
                (candidate, result)
            })
            .buffer_unordered(self.concurrency);

        let mut accepted: BTreeMap<(String, String), PackageDescriptor> = BTreeMap::new();

        while let Some((candidate, result)) = results.next().await {
            if !matches!(result, Err(CandidateError::TransportFailure { .. })) {
                outcome.fetched += 1;
            }

            match result {
                Ok(Some(descriptor)) => self.merge(&mut accepted, descriptor, &mut outcome),
                Ok(None) => {
                    warn!(
                        "Could not find {} in {}, skipping",
                        MANIFEST_ENTRY, candidate
                    );
                    outcome.skipped += 1;
                }
                Err(error) if error.aborts(candidate.is_explicit()) => {
                    return Err(ReconcileError::Aborted {
                        url: candidate.archive_url,
                        declared_id: candidate.declared_id,
                        declared_version: candidate.declared_version,
                        source: error,
                    });
                }
                Err(error) => {
                    warn!("Skipping {}: {}", candidate, error);
                    outcome.failed.push((candidate, error));
                }
            }
        }

        outcome.accepted = accepted.into_values().collect();
        outcome
            .failed
            .sort_by(|(a, _), (b, _)| a.archive_url.cmp(&b.archive_url));
        Ok(outcome)
    }

    async fn process(
        &self,
        candidate: &Candidate,
    ) -> Result<Option<PackageDescriptor>, CandidateError> {
        debug!("Looking at {}", candidate);

        let bytes = self
            .downloader
            .fetch(&candidate.archive_url)
            .await
            .map_err(|source| CandidateError::TransportFailure {
                url: candidate.archive_url.clone(),
                source,
            })?;

        verify(candidate, &bytes)
    }

    fn merge(
        &self,
        accepted: &mut BTreeMap<(String, String), PackageDescriptor>,
        descriptor: PackageDescriptor,
        outcome: &mut Reconciliation,
    ) {
        if self
            .existing
            .contains_identity(descriptor.id(), descriptor.version())
        {
            info!(
                "{} {} is already listed, skipping {}",
                descriptor.id(),
                descriptor.version(),
                descriptor.archive_url()
            );
            outcome.skipped += 1;
            return;
        }

        match accepted.entry(descriptor.identity()) {
            Entry::Vacant(entry) => {
                info!(
                    "Found {} {}, adding to listing",
                    descriptor.id(),
                    descriptor.version()
                );
                entry.insert(descriptor);
            }
            Entry::Occupied(mut entry) => {
                let (kept, dropped) = if descriptor.archive_url() < entry.get().archive_url() {
                    let previous = entry.insert(descriptor);
                    (entry.get().archive_url().to_string(), previous)
                } else {
                    (entry.get().archive_url().to_string(), descriptor)
                };
                info!(
                    "{} {} is published at both {} and {}, keeping {}",
                    dropped.id(),
                    dropped.version(),
                    kept,
                    dropped.archive_url(),
                    kept
                );
                outcome.skipped += 1;
            }
        }
    }
}

/// Extract, validate and fingerprint one downloaded archive.
///
/// `Ok(None)` means the archive has no package manifest.
pub fn verify(
    candidate: &Candidate,
    bytes: &[u8],
) -> Result<Option<PackageDescriptor>, CandidateError> {
    let Some(raw) = archive::extract(bytes, MANIFEST_ENTRY)? else {
        return Ok(None);
    };

    let manifest = manifest::validate(
        &raw,
        candidate.declared_id.as_deref(),
        candidate.declared_version.as_deref(),
    )?;

    Ok(Some(
        manifest.into_descriptor(candidate.archive_url.clone(), fingerprint(bytes)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::CandidateOrigin;
    use crate::download::MockDownloader;
    use crate::error::{IdentityField, ManifestError};
    use crate::index::{IndexDocument, assemble};
    use crate::listing::ListingSource;
    use crate::test_utils::{package_zip, zip_bytes};
    use mockall::predicate::eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn explicit(url: &str, id: &str, version: Option<&str>) -> Candidate {
        Candidate {
            archive_url: url.to_string(),
            declared_id: Some(id.to_string()),
            declared_version: version.map(str::to_string),
            origin: CandidateOrigin::Explicit {
                package_id: id.to_string(),
            },
        }
    }

    fn discovered(url: &str) -> Candidate {
        Candidate {
            archive_url: url.to_string(),
            declared_id: None,
            declared_version: None,
            origin: CandidateOrigin::Repository {
                repo: "o/r".parse().unwrap(),
                release: "v1".to_string(),
            },
        }
    }

    /// A downloader serving fixed bytes per URL and failing for anything else.
    fn serving(files: Vec<(&str, Vec<u8>)>) -> MockDownloader {
        let files: Arc<HashMap<String, Vec<u8>>> = Arc::new(
            files
                .into_iter()
                .map(|(url, bytes)| (url.to_string(), bytes))
                .collect(),
        );
        let mut downloader = MockDownloader::new();
        downloader.expect_fetch().returning(move |url| {
            files
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("HTTP 404 for {}", url))
        });
        downloader
    }

    fn existing_with(descriptors: Vec<PackageDescriptor>) -> ExistingIndex {
        let document: IndexDocument =
            assemble(&ListingSource::default(), &descriptors, &ExistingIndex::empty());
        ExistingIndex::from_document(document)
    }

    #[test]
    fn test_verify_attaches_url_and_hash() {
        let bytes = package_zip("p", "1.0.0");
        let descriptor = verify(&discovered("https://x/p.zip"), &bytes)
            .unwrap()
            .unwrap();

        assert_eq!(descriptor.archive_url(), "https://x/p.zip");
        assert_eq!(descriptor.content_hash(), Some(&fingerprint(&bytes)));
    }

    #[test]
    fn test_verify_without_manifest() {
        let bytes = zip_bytes(&[("README.md", "hello")]);
        assert!(verify(&discovered("u"), &bytes).unwrap().is_none());
    }

    #[test]
    fn test_verify_identity_mismatch() {
        let bytes = package_zip("a", "1.0.0");
        let err = verify(&explicit("u", "b", None), &bytes).unwrap_err();
        assert!(matches!(
            err,
            CandidateError::Manifest(ManifestError::IdentityMismatch {
                field: IdentityField::Id,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_skips_known_urls_without_fetching() {
        let existing_bytes = package_zip("p", "1.0.0");
        let existing = existing_with(vec![
            verify(&discovered("https://x/p-1.0.0.zip"), &existing_bytes)
                .unwrap()
                .unwrap(),
        ]);

        let mut downloader = MockDownloader::new();
        downloader
            .expect_fetch()
            .with(eq("https://x/p-1.1.0.zip"))
            .times(1)
            .returning(|_| Ok(package_zip("p", "1.1.0")));

        let outcome = Reconciler::new(&downloader, &existing)
            .reconcile(vec![
                explicit("https://x/p-1.0.0.zip", "p", None),
                explicit("https://x/p-1.1.0.zip", "p", None),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].version(), "1.1.0");
    }

    #[tokio::test]
    async fn test_explicit_version_mismatch_aborts() {
        let downloader = serving(vec![("https://x/p.zip", package_zip("p", "2.9.9"))]);
        let existing = ExistingIndex::empty();

        let err = Reconciler::new(&downloader, &existing)
            .reconcile(vec![explicit("https://x/p.zip", "p", Some("3.0.0"))])
            .await
            .unwrap_err();

        let ReconcileError::Aborted {
            url,
            declared_version,
            source,
            ..
        } = err;
        assert_eq!(url, "https://x/p.zip");
        assert_eq!(declared_version.as_deref(), Some("3.0.0"));
        assert!(matches!(
            source,
            CandidateError::Manifest(ManifestError::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_starts_no_further_downloads() {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_fetch()
            .with(eq("https://x/p.zip"))
            .times(1)
            .returning(|_| Ok(package_zip("other", "1.0.0")));
        let existing = ExistingIndex::empty();

        let result = Reconciler::new(&downloader, &existing)
            .with_concurrency(1)
            .reconcile(vec![
                explicit("https://x/p.zip", "p", None),
                discovered("https://x/a.zip"),
                discovered("https://x/b.zip"),
            ])
            .await;

        assert!(matches!(result, Err(ReconcileError::Aborted { .. })));
    }

    #[tokio::test]
    async fn test_explicit_transport_failure_aborts() {
        let downloader = serving(vec![]);
        let existing = ExistingIndex::empty();

        let result = Reconciler::new(&downloader, &existing)
            .reconcile(vec![explicit("https://x/gone.zip", "p", None)])
            .await;

        assert!(matches!(
            result,
            Err(ReconcileError::Aborted {
                source: CandidateError::TransportFailure { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_repository_failures_are_recorded() {
        let downloader = serving(vec![
            ("https://x/good.zip", package_zip("p", "2.0.0")),
            ("https://x/corrupt.zip", b"garbage".to_vec()),
            ("https://x/malformed.zip", zip_bytes(&[("package.json", "{")])),
            ("https://x/plain.zip", zip_bytes(&[("docs/readme.txt", "hi")])),
        ]);
        let existing = ExistingIndex::empty();

        let outcome = Reconciler::new(&downloader, &existing)
            .with_concurrency(2)
            .reconcile(vec![
                discovered("https://x/good.zip"),
                discovered("https://x/missing.zip"),
                discovered("https://x/corrupt.zip"),
                discovered("https://x/malformed.zip"),
                discovered("https://x/plain.zip"),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].identity(), ("p".into(), "2.0.0".into()));
        assert_eq!(outcome.skipped, 1);

        let failed: Vec<&str> = outcome
            .failed
            .iter()
            .map(|(c, _)| c.archive_url.as_str())
            .collect();
        assert_eq!(
            failed,
            vec![
                "https://x/corrupt.zip",
                "https://x/malformed.zip",
                "https://x/missing.zip"
            ]
        );
        assert!(matches!(outcome.failed[0].1, CandidateError::CorruptArchive(_)));
        assert!(matches!(outcome.failed[1].1, CandidateError::Manifest(_)));
        assert!(matches!(
            outcome.failed[2].1,
            CandidateError::TransportFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_explicit_corrupt_archive_is_recorded_not_aborted() {
        let downloader = serving(vec![("https://x/p.zip", b"not a zip".to_vec())]);
        let existing = ExistingIndex::empty();

        let outcome = Reconciler::new(&downloader, &existing)
            .reconcile(vec![explicit("https://x/p.zip", "p", None)])
            .await
            .unwrap();

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_identity_keeps_smallest_url() {
        let bytes = package_zip("p", "1.0.0");
        let downloader = serving(vec![
            ("https://b.example/p.zip", bytes.clone()),
            ("https://a.example/p.zip", bytes.clone()),
            ("https://c.example/p.zip", bytes),
        ]);
        let existing = ExistingIndex::empty();

        for concurrency in [1, 3] {
            let outcome = Reconciler::new(&downloader, &existing)
                .with_concurrency(concurrency)
                .reconcile(vec![
                    discovered("https://b.example/p.zip"),
                    discovered("https://c.example/p.zip"),
                    discovered("https://a.example/p.zip"),
                ])
                .await
                .unwrap();

            assert_eq!(outcome.accepted.len(), 1);
            assert_eq!(outcome.accepted[0].archive_url(), "https://a.example/p.zip");
            assert_eq!(outcome.skipped, 2);
        }
    }

    #[tokio::test]
    async fn test_existing_identity_under_new_url_is_skipped() {
        let existing = existing_with(vec![
            verify(&discovered("https://old/p.zip"), &package_zip("p", "1.0.0"))
                .unwrap()
                .unwrap(),
        ]);
        let downloader = serving(vec![("https://new/p.zip", package_zip("p", "1.0.0"))]);

        let outcome = Reconciler::new(&downloader, &existing)
            .reconcile(vec![discovered("https://new/p.zip")])
            .await
            .unwrap();

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.fetched, 1);
    }

    #[tokio::test]
    async fn test_result_is_independent_of_concurrency() {
        let files: Vec<(String, Vec<u8>)> = (0..12)
            .map(|i| {
                (
                    format!("https://x/p-{}.zip", i),
                    package_zip(&format!("p{}", i % 4), &format!("1.0.{}", i)),
                )
            })
            .collect();
        let downloader = serving(files.iter().map(|(u, b)| (u.as_str(), b.clone())).collect());
        let existing = ExistingIndex::empty();
        let candidates: Vec<Candidate> = files.iter().map(|(u, _)| discovered(u)).collect();

        let serial = Reconciler::new(&downloader, &existing)
            .with_concurrency(1)
            .reconcile(candidates.clone())
            .await
            .unwrap();
        let parallel = Reconciler::new(&downloader, &existing)
            .with_concurrency(8)
            .reconcile(candidates)
            .await
            .unwrap();

        assert_eq!(serial.accepted, parallel.accepted);
        assert_eq!(serial.accepted.len(), 12);
    }
}
