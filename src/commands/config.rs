use anyhow::Result;
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};

use std::path::PathBuf;

use crate::{
    download::{Downloader, HttpDownloader},
    http::HttpClient,
    listing::{ListingOverrides, SOURCE_FILENAME},
    reconcile::DEFAULT_CONCURRENCY,
    runtime::Runtime,
    source::{DEFAULT_API_URL, GitHubSource, ReleaseSource},
};

/// Some archive hosts reject requests without a recognizable client.
pub const USER_AGENT: &str = "VCCBootstrap/1.0";

/// Everything a build run is told from the outside.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    pub overrides: ListingOverrides,
    pub current_listing_url: Option<String>,
    pub package_manifest: Option<PathBuf>,
    /// "owner/name" of the repository being built.
    pub repository: Option<String>,
    pub website: Option<PathBuf>,
    pub api_url: Option<String>,
    pub concurrency: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::from(SOURCE_FILENAME),
            output: PathBuf::from("."),
            overrides: ListingOverrides::default(),
            current_listing_url: None,
            package_manifest: None,
            repository: None,
            website: None,
            api_url: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// The collaborators of one build run.
pub struct BuildConfig<R: Runtime, S: ReleaseSource, D: Downloader> {
    pub runtime: R,
    pub source: S,
    pub downloader: D,
    /// Carries the credential; used for the current published listing.
    pub api_client: HttpClient,
    pub options: BuildOptions,
}

impl<R: Runtime> BuildConfig<R, GitHubSource, HttpDownloader> {
    pub fn new(runtime: R, options: BuildOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Ok(token) = runtime.env_var("GITHUB_TOKEN")
            && !token.trim().is_empty()
        {
            let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))?;
            auth_value.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_value);
            debug!(
                "Using GITHUB_TOKEN for authentication: {}",
                mask_token(token.trim())
            );
        }

        let api = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        // Archives may live on any host; they never see the credential.
        let download = Client::builder().user_agent(USER_AGENT).build()?;

        let api_client = HttpClient::new(api);
        let source = GitHubSource::from_http_client(
            api_client.clone(),
            options.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
        );
        let downloader = HttpDownloader::new(HttpClient::new(download));

        Ok(Self {
            runtime,
            source,
            downloader,
            api_client,
            options,
        })
    }
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*********".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockito::{Matcher, Server};

    fn runtime_with_token(token: Option<&str>) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        let token = token.map(|t| t.to_string());
        runtime
            .expect_env_var()
            .with(mockall::predicate::eq("GITHUB_TOKEN"))
            .returning(move |_| token.clone().ok_or(std::env::VarError::NotPresent));
        runtime
    }

    /// Helper function to verify Authorization header behavior
    /// - `token`: Some(token) to test with GITHUB_TOKEN set, None to test without
    async fn verify_authorization_header(token: Option<&str>) {
        let runtime = runtime_with_token(token);

        let mut server = Server::new_async().await;

        let expected_header = match token {
            Some(t) => Matcher::Exact(format!("Bearer {}", t)),
            None => Matcher::Missing,
        };

        let mock = server
            .mock("GET", "/")
            .match_header("Authorization", expected_header)
            .match_header("User-Agent", USER_AGENT)
            .create_async()
            .await;

        let config = BuildConfig::new(runtime, BuildOptions::default()).unwrap();
        let _ = config.api_client.inner().get(server.url()).send().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_config_new_with_github_token() {
        verify_authorization_header(Some("ghp_test_token_value")).await;
    }

    #[tokio::test]
    async fn test_config_new_without_github_token() {
        verify_authorization_header(None).await;
    }

    #[tokio::test]
    async fn test_downloads_never_carry_the_token() {
        let runtime = runtime_with_token(Some("ghp_test_token_value"));
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/p.zip")
            .match_header("Authorization", Matcher::Missing)
            .match_header("User-Agent", USER_AGENT)
            .create_async()
            .await;

        let config = BuildConfig::new(runtime, BuildOptions::default()).unwrap();
        let _ = config
            .downloader
            .http_client()
            .inner()
            .get(format!("{}/p.zip", server.url()))
            .send()
            .await;

        mock.assert_async().await;
    }

    #[test]
    fn test_config_uses_api_url_override() {
        let runtime = runtime_with_token(None);
        let options = BuildOptions {
            api_url: Some("http://localhost:1234/".into()),
            ..Default::default()
        };
        let config = BuildConfig::new(runtime, options).unwrap();
        assert_eq!(config.source.api_url(), "http://localhost:1234");
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "*********");
        assert_eq!(
            mask_token("ghp_abcdefghijklmnop1234"),
            "ghp_abcd*********1234"
        );
    }
}
