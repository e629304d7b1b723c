use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while retrieving a feed document.
///
/// Anything that prevents a complete, successful response body from reaching
/// the parser: network issues, non-success statuses, oversized or truncated
/// bodies, and cancellation.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, invalid URL, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The request did not finish within the client timeout
    #[error("Request timed out")]
    Timeout,
    /// The surrounding cycle was cancelled before the fetch finished
    #[error("Fetch cancelled")]
    Cancelled,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

/// A fetched feed document.
///
/// The body is owned by whoever holds it and is released when dropped, so
/// handing it to the parser by value guarantees release on every path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedBody {
    bytes: Vec<u8>,
}

impl FeedBody {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for FeedBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for FeedBody {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

impl From<String> for FeedBody {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

/// Retrieves raw feed documents.
///
/// Implementations must return promptly with [`FetchError::Cancelled`] once
/// `cancel` fires, and must report non-success responses as errors rather
/// than handing back their bodies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FeedBody, FetchError>;
}

/// [`FeedFetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_size: usize,
    span: tracing::Span,
}

impl HttpFetcher {
    /// Builds a fetcher with its own client (connect timeout 10s, request timeout 30s).
    pub fn new(span: tracing::Span) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("newsroom/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, span))
    }

    /// Wraps an existing client, e.g. one shared with other components.
    pub fn with_client(client: reqwest::Client, span: tracing::Span) -> Self {
        Self {
            client,
            max_body_size: MAX_FEED_SIZE,
            span,
        }
    }

    /// Overrides the response size limit (default 10MB).
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    async fn fetch_inner(&self, url: &str) -> Result<FeedBody, FetchError> {
        tracing::debug!("Fetching feed");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        // Non-success responses are dropped here, releasing the connection
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Unexpected status code");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_body_size).await?;
        tracing::debug!(bytes = bytes.len(), "Feed fetched");
        Ok(FeedBody::new(bytes))
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FeedBody, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let span = tracing::debug_span!(parent: &self.span, "fetch", url = %url);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(parent: &span, "Fetch cancelled");
                Err(FetchError::Cancelled)
            }
            result = self.fetch_inner(url).instrument(span.clone()) => result,
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
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
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
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
