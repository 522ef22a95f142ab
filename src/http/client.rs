//! HTTP client with built-in retry logic and error handling.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY, check_retryable};

/// Upper bound on the buffer reserved up front for a download.
const MAX_PREALLOCATION: u64 = 64 << 20;

/// HTTP client with built-in retry logic for network operations.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry_delay: Duration,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Overrides the pause between attempts.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Performs a GET request and deserializes the JSON response.
    #[tracing::instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_json_with_query(url, &[]).await
    }

    /// Performs a GET request with query parameters and deserializes the JSON response.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!("GET JSON from {} with query {:?}...", url, query);

        self.with_retry("GET JSON", || async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .context("Failed to send request")?;

            let response = response.error_for_status().map_err(check_retryable)?;

            response
                .json::<T>()
                .await
                .context("Failed to parse JSON response")
        })
        .await
    }

    /// Performs a GET request and returns the body as text, sending the
    /// given `Accept` header when set.
    #[tracing::instrument(skip(self))]
    pub async fn get_text(&self, url: &str, accept: Option<&str>) -> Result<String> {
        debug!("GET text from {}...", url);

        self.with_retry("GET text", || async {
            let mut request = self.client.get(url);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }

            let response = request.send().await.context("Failed to send request")?;
            let response = response.error_for_status().map_err(check_retryable)?;

            response.text().await.context("Failed to read response body")
        })
        .await
    }

    /// Downloads a whole file into memory.
    #[tracing::instrument(skip(self))]
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Downloading {}...", url);
        self.with_retry("Download", || self.get_bytes_once(url)).await
    }

    /// Single download attempt without retry.
    async fn get_bytes_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;

        // Content-Length is only a hint from the remote host.
        let hint = response.content_length().unwrap_or(0).min(MAX_PREALLOCATION);
        let mut bytes = Vec::with_capacity(hint as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            bytes.extend_from_slice(&chunk);
        }

        debug!(
            "Downloaded {:.2} MB from {}",
            bytes.len() as f64 / (1024.0 * 1024.0),
            url
        );

        Ok(bytes)
    }

    /// Executes an async operation with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable_error(&e) {
                        debug!("{}: non-retryable error: {}", operation_name, e);
                        return Err(e);
                    }

                    if attempt < MAX_RETRIES {
                        warn!(
                            "{}: attempt {}/{} failed ({:#}), retrying in {:?}...",
                            operation_name, attempt, MAX_RETRIES, e, self.retry_delay
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("{}: failed after {} attempts", operation_name, MAX_RETRIES)
        }))
    }
}

fn is_retryable_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<NonRetryableError>().is_none()
}
