use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::fetcher::{FeedFetcher, FetchError};
use super::model::FeedDirectory;
use super::parser::{FeedParser, ParseError};
use crate::storage::{EntryStore, StoreError};

/// Pipeline stage at which processing a feed stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Parse,
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Save => "save",
        })
    }
}

/// Failure to ingest one feed, tagged with the feed's display name and the
/// stage that failed. Later stages are never attempted after a failure.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{feed}: fetch failed: {source}")]
    Fetch {
        feed: String,
        #[source]
        source: FetchError,
    },
    #[error("{feed}: parse failed: {source}")]
    Parse {
        feed: String,
        #[source]
        source: ParseError,
    },
    #[error("{feed}: save failed: {source}")]
    Save {
        feed: String,
        #[source]
        source: StoreError,
    },
    /// Cancellation was observed before the given stage could finish
    #[error("{feed}: cancelled during {stage}")]
    Cancelled { feed: String, stage: Stage },
}

impl ProcessError {
    pub fn stage(&self) -> Stage {
        match self {
            ProcessError::Fetch { .. } => Stage::Fetch,
            ProcessError::Parse { .. } => Stage::Parse,
            ProcessError::Save { .. } => Stage::Save,
            ProcessError::Cancelled { stage, .. } => *stage,
        }
    }

    pub fn feed(&self) -> &str {
        match self {
            ProcessError::Fetch { feed, .. }
            | ProcessError::Parse { feed, .. }
            | ProcessError::Save { feed, .. }
            | ProcessError::Cancelled { feed, .. } => feed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}

/// Outcome of one successful pass over a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    /// Entries the parser kept
    pub found: usize,
    /// Entries newly written to the store
    pub saved: usize,
    pub elapsed: Duration,
}

/// Runs the fetch, parse and save stages for a single feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedProcessor: Send + Sync {
    async fn process_feed(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<ProcessReport, ProcessError>;
}

/// The production [`FeedProcessor`], wiring a fetcher, parser and store together.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn FeedFetcher>,
    parser: Arc<dyn FeedParser>,
    store: Arc<dyn EntryStore>,
    directory: Arc<FeedDirectory>,
    span: tracing::Span,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        parser: Arc<dyn FeedParser>,
        store: Arc<dyn EntryStore>,
        directory: Arc<FeedDirectory>,
        span: tracing::Span,
    ) -> Self {
        Self {
            fetcher,
            parser,
            store,
            directory,
            span,
        }
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        url: &str,
        feed: &str,
    ) -> Result<ProcessReport, ProcessError> {
        let started = Instant::now();
        tracing::info!("Processing feed");

        let body = self.fetcher.fetch(url, cancel).await.map_err(|source| match source {
            FetchError::Cancelled => ProcessError::Cancelled {
                feed: feed.to_string(),
                stage: Stage::Fetch,
            },
            source => ProcessError::Fetch {
                feed: feed.to_string(),
                source,
            },
        })?;
        tracing::debug!(bytes = body.len(), "Fetched");

        // The body moves into the parser and is released when parsing returns
        let parsed = self
            .parser
            .parse(cancel, body)
            .await
            .map_err(|source| match source {
                ParseError::Cancelled => ProcessError::Cancelled {
                    feed: feed.to_string(),
                    stage: Stage::Parse,
                },
                source => ProcessError::Parse {
                    feed: feed.to_string(),
                    source,
                },
            })?;
        let found = parsed.entries.len();
        tracing::debug!(entries = found, "Parsed");

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled {
                feed: feed.to_string(),
                stage: Stage::Save,
            });
        }

        // Dropping the save future rolls back its transaction
        let saved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProcessError::Cancelled {
                    feed: feed.to_string(),
                    stage: Stage::Save,
                });
            }
            result = self.store.save_entries(&parsed.entries) => {
                result.map_err(|source| ProcessError::Save {
                    feed: feed.to_string(),
                    source,
                })?
            }
        };

        let report = ProcessReport {
            found,
            saved,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            found = report.found,
            saved = report.saved,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Feed processed"
        );
        Ok(report)
    }
}

#[async_trait]
impl FeedProcessor for Pipeline {
    async fn process_feed(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<ProcessReport, ProcessError> {
        let feed = self.directory.display_name(url);
        let span = tracing::info_span!(parent: &self.span, "process_feed", feed = %feed, url = %url);

        let result = self.run(cancel, url, &feed).instrument(span.clone()).await;
        if let Err(e) = &result {
            if e.is_cancelled() {
                tracing::debug!(parent: &span, stage = %e.stage(), "Feed processing cancelled");
            } else {
                tracing::error!(parent: &span, stage = %e.stage(), error = %e, "Feed processing failed");
            }
        }
        result
    }
}
