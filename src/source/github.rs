//! GitHub source implementation.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use crate::http::HttpClient;

use super::{ReleaseAsset, ReleaseSource, RepoId, SourceRelease};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

// 100 pages of 100 releases; stops a misbehaving API from looping forever.
const MAX_PAGES: usize = 100;

/// GitHub API response types (internal).
mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct Release {
        pub tag_name: String,
        pub name: Option<String>,
        #[serde(default)]
        pub assets: Vec<Asset>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Asset {
        pub name: String,
        #[serde(default)]
        pub size: u64,
        pub browser_download_url: String,
    }
}

/// GitHub source implementation.
pub struct GitHubSource {
    http_client: HttpClient,
    api_url: String,
}

impl GitHubSource {
    /// Create from an existing HttpClient.
    pub fn from_http_client(http_client: HttpClient, api_url: &str) -> Self {
        Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// The API base URL, without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn fetch_releases(&self, repo: &RepoId) -> Result<Vec<api::Release>> {
        let url = format!("{}/repos/{}/{}/releases", self.api_url, repo.owner, repo.repo);
        let per_page = PER_PAGE.to_string();
        let mut releases = Vec::new();

        for page in 1..=MAX_PAGES {
            debug!("Fetching releases page {} from {}...", page, url);

            let parsed: Vec<api::Release> = self
                .http_client
                .get_json_with_query(&url, &[("per_page", &per_page), ("page", &page.to_string())])
                .await?;

            let len = parsed.len();
            releases.extend(parsed);

            if len < PER_PAGE {
                break;
            }
        }

        Ok(releases)
    }
}

#[async_trait]
impl ReleaseSource for GitHubSource {
    #[tracing::instrument(skip(self))]
    async fn get_releases(&self, repo: &RepoId) -> Result<Vec<SourceRelease>> {
        let releases = self.fetch_releases(repo).await?;
        Ok(releases.into_iter().map(SourceRelease::from).collect())
    }
}

impl From<api::Release> for SourceRelease {
    fn from(r: api::Release) -> Self {
        SourceRelease {
            tag: r.tag_name,
            name: r.name,
            assets: r.assets.into_iter().map(ReleaseAsset::from).collect(),
        }
    }
}

impl From<api::Asset> for ReleaseAsset {
    fn from(a: api::Asset) -> Self {
        ReleaseAsset {
            name: a.name,
            size: a.size,
            download_url: a.browser_download_url,
        }
    }
}
