use anyhow::{Context, Result};
use log::{error, info, warn};
use std::path::PathBuf;

use crate::{
    discovery::{DiscoveryFailure, discover},
    download::Downloader,
    error::{CandidateError, ConfigError},
    index::{ExistingIndex, INDEX_FILENAME, IndexDocument, assemble, latest_view},
    listing,
    reconcile::Reconciler,
    render::{RenderContext, WebsiteReport, render_website},
    runtime::Runtime,
    source::{ReleaseSource, RepoId},
    view::{ListingInfo, format_packages},
};

use super::config::{BuildConfig, BuildOptions};

/// Sent when fetching the currently published listing.
const LISTING_ACCEPT: &str = "application/octet-stream";

/// Summary of a completed build.
#[derive(Debug)]
pub struct BuildReport {
    pub index_path: PathBuf,
    pub listing_id: String,
    /// Entries in the written index.
    pub total: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub fetched: usize,
    pub failed: Vec<(String, CandidateError)>,
    pub discovery_failures: Vec<DiscoveryFailure>,
    pub website: Option<WebsiteReport>,
}

#[tracing::instrument(skip(runtime, options))]
pub async fn build<R: Runtime>(runtime: R, options: BuildOptions) -> Result<BuildReport> {
    let config = BuildConfig::new(runtime, options)?;
    run(&config).await
}

/// Reconcile the listing source against the published index and write the
/// next index. Nothing is written when the run aborts.
#[tracing::instrument(skip(config))]
pub async fn run<R: Runtime, S: ReleaseSource, D: Downloader>(
    config: &BuildConfig<R, S, D>,
) -> Result<BuildReport> {
    let options = &config.options;

    let repository = options
        .repository
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .map(str::parse::<RepoId>)
        .transpose()
        .map_err(ConfigError::from)?;

    let published_url = repository.as_ref().map(listing::published_url);

    let mut listing = listing::resolve(
        &config.runtime,
        &options.source,
        options.package_manifest.as_deref(),
        options.overrides.url.as_deref().or(published_url.as_deref()),
        repository.as_ref(),
    )?;
    options.overrides.apply(&mut listing);
    listing.ensure_id(repository.as_ref())?;

    let current_url = current_listing_url(
        options.current_listing_url.as_deref(),
        published_url.as_deref(),
    );
    let existing = load_existing(config, current_url).await?;
    info!(
        "Building listing {} ({} packages, {} repositories, {} versions already published)",
        listing.id,
        listing.packages.len(),
        listing.github_repos.len(),
        existing.len()
    );

    let discovery = discover(&listing, &config.source, options.concurrency).await;
    let discovery_skips = discovery.releases_without_archives;

    let outcome = Reconciler::new(&config.downloader, &existing)
        .with_concurrency(options.concurrency)
        .reconcile(discovery.candidates)
        .await?;

    info!("All packages prepared, generating listing");
    let document = assemble(&listing, &outcome.accepted, &existing);

    config
        .runtime
        .create_dir_all(&options.output)
        .with_context(|| format!("Failed to create output directory {}", options.output.display()))?;
    let index_path = options.output.join(INDEX_FILENAME);
    let json = document.to_json().context("Failed to serialize the index")?;
    config.runtime.write(&index_path, json.as_bytes())?;
    info!("Saved listing to {}", index_path.display());

    let website = match &options.website {
        Some(website_dir) => {
            let listing_info = ListingInfo::from_listing(&listing);
            let packages = format_packages(latest_view(document.descriptors()));
            let context = RenderContext {
                listing_info: &listing_info,
                packages: &packages,
            };
            Some(render_website(
                &config.runtime,
                website_dir,
                &options.output,
                &context,
            )?)
        }
        None => None,
    };

    let report = BuildReport {
        index_path,
        listing_id: listing.id,
        total: document.len(),
        accepted: outcome.accepted.len(),
        skipped: outcome.skipped + discovery_skips,
        fetched: outcome.fetched,
        failed: outcome
            .failed
            .into_iter()
            .map(|(candidate, error)| (candidate.archive_url, error))
            .collect(),
        discovery_failures: discovery.failures,
        website,
    };
    log_summary(&report);
    Ok(report)
}

/// Where the previously published index is fetched from. An explicit URL
/// wins; with a repository it is that repository's Pages site.
fn current_listing_url<'a>(
    explicit: Option<&'a str>,
    published: Option<&'a str>,
) -> Option<&'a str> {
    explicit.filter(|url| !url.trim().is_empty()).or(published)
}

/// The previously published index: from `current_url` when there is one,
/// else from the output directory, else empty.
async fn load_existing<R: Runtime, S: ReleaseSource, D: Downloader>(
    config: &BuildConfig<R, S, D>,
    current_url: Option<&str>,
) -> Result<ExistingIndex> {
    let options = &config.options;

    if let Some(url) = current_url {
        return match config.api_client.get_text(url, Some(LISTING_ACCEPT)).await {
            Ok(text) => Ok(ExistingIndex::from_document(IndexDocument::parse(
                &text, url,
            )?)),
            Err(e) => {
                error!("Could not download the current listing from {}: {:#}", url, e);
                Ok(ExistingIndex::empty())
            }
        };
    }

    let path = options.output.join(INDEX_FILENAME);
    if !config.runtime.exists(&path) {
        return Ok(ExistingIndex::empty());
    }

    let text = config
        .runtime
        .read_to_string(&path)
        .map_err(|source| ConfigError::Unreadable {
            path: path.clone(),
            source,
        })?;
    let document = IndexDocument::parse(&text, &path.display().to_string())?;
    Ok(ExistingIndex::from_document(document))
}

fn log_summary(report: &BuildReport) {
    info!(
        "Listing {}: {} new, {} skipped, {} failed, {} archives downloaded, {} versions in total",
        report.listing_id,
        report.accepted,
        report.skipped,
        report.failed.len() + report.discovery_failures.len(),
        report.fetched,
        report.total
    );
    for failure in &report.discovery_failures {
        warn!("  {}: {}", failure.reference, failure.error);
    }
    for (url, error) in &report.failed {
        warn!("  {}: {}", url, error);
    }
}
