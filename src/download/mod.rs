//! Fetching release archives into memory.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use crate::http::HttpClient;

/// Fetches the raw bytes of a release archive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloader backed by the retrying [`HttpClient`].
pub struct HttpDownloader {
    http_client: HttpClient,
}

impl HttpDownloader {
    pub fn new(http_client: HttpClient) -> Self {
        Self { http_client }
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http_client
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.http_client.get_bytes(url).await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}
