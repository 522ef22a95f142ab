//! Retry classification for network operations.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of attempts for a network operation.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// HTTP failures that will not succeed on a second attempt.
#[derive(Debug, Error, PartialEq)]
pub enum NonRetryableError {
    #[error(
        "rate limit exceeded (HTTP {0}). Try again later or set the GITHUB_TOKEN environment variable"
    )]
    RateLimitExceeded(u16),

    #[error("authentication failed (HTTP 401). Check your GITHUB_TOKEN")]
    AuthenticationFailed,

    #[error("not found (HTTP 404)")]
    NotFound,

    #[error("access forbidden (HTTP 403). You may need authentication")]
    Forbidden,

    #[error("request rejected (HTTP {0})")]
    ClientError(u16),
}

/// Classifies an error as retryable or non-retryable.
/// Returns Ok(()) if the error is retryable.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    let Some(status) = error.status() else {
        // Connection errors, timeouts, etc.
        return Ok(());
    };

    match status {
        StatusCode::UNAUTHORIZED => Err(NonRetryableError::AuthenticationFailed),
        StatusCode::FORBIDDEN => {
            let msg = error.to_string().to_lowercase();
            if msg.contains("rate limit") {
                Err(NonRetryableError::RateLimitExceeded(status.as_u16()))
            } else {
                Err(NonRetryableError::Forbidden)
            }
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Err(NonRetryableError::RateLimitExceeded(status.as_u16()))
        }
        StatusCode::NOT_FOUND => Err(NonRetryableError::NotFound),
        s if s.is_client_error() => Err(NonRetryableError::ClientError(s.as_u16())),
        // 5xx
        _ => Ok(()),
    }
}

/// Maps an error from `error_for_status()` to an `anyhow::Error`, swapping in
/// a [`NonRetryableError`] when retrying is pointless.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}
