use crate::feed::parser::{parse_feed, ParseResult};
use crate::storage::FeedItem;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a fetch failure, reported per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, DNS, connection, TLS, non-2xx status, oversized or truncated body.
    Network,
    /// The body was not a readable RSS/Atom document.
    Parse,
}

/// Errors that can occur while retrieving and parsing one feed source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Parse(_) => ErrorKind::Parse,
            FetchError::Network(_)
            | FetchError::HttpStatus(_)
            | FetchError::Timeout
            | FetchError::RateLimited(_)
            | FetchError::ResponseTooLarge
            | FetchError::IncompleteResponse { .. } => ErrorKind::Network,
        }
    }
}

/// Network settings for [`FeedFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after 429/5xx or a truncated body.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub retry_base_delay: Duration,
    /// Largest body accepted, in bytes.
    pub max_feed_size: usize,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            max_feed_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Retrieves and parses a single feed source.
///
/// Holds no per-source state, so one fetcher serves every page and every
/// concurrent fetch; a failure only ever affects the source being fetched.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    options: FetcherOptions,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, options: FetcherOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &FetcherOptions {
        &self.options
    }

    /// Fetch `url` and normalize its entries into [`FeedItem`]s.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the configured timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::RateLimited`] - 429 response after max retries
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length after retries
    /// - [`FetchError::Parse`] - Invalid RSS/Atom XML
    pub async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        let bytes = self.fetch_bytes(url).await?;

        let ParseResult { items, skipped } =
            parse_feed(&bytes, url).map_err(|e| FetchError::Parse(e.to_string()))?;

        if skipped > 0 {
            tracing::warn!(
                feed = %url,
                filtered = skipped,
                "Entries without a link or date skipped"
            );
        }

        Ok(items)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let max_retries = self.options.max_retries;
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(self.options.timeout, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx and other non-success statuses fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, self.options.max_feed_size).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// base, 2×base, 4×base, ...
    fn backoff(&self, retry_count: u32) -> Duration {
        self.options
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
