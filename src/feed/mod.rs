//! Feed ingestion: retrieval, parsing and per-feed processing.
//!
//! - [`fetcher`] - HTTP retrieval behind the [`FeedFetcher`] capability
//! - [`parser`] - RSS/Atom decoding via `feed-rs`, with a tolerant date ladder
//! - [`processor`] - the fetch → parse → save pipeline for one feed
//!
//! The capabilities are object-safe traits so any stage can be swapped for a
//! fake in tests.
//!
//! # Example
//!
//! ```ignore
//! let pipeline = Pipeline::new(fetcher, parser, store, directory, span);
//! let report = pipeline.process_feed(&cancel, "https://example.com/rss").await?;
//! ```

mod fetcher;
mod model;
mod parser;
mod processor;

pub use fetcher::{FeedBody, FeedFetcher, FetchError, HttpFetcher};
pub use model::{Entry, Feed, FeedDirectory, FeedSource};
pub use parser::{parse_feed, parse_pub_date, DateParseError, FeedParser, ParseError, SyndicationParser};
pub use processor::{FeedProcessor, Pipeline, ProcessError, ProcessReport, Stage};
#[cfg(test)]
pub use processor::MockFeedProcessor;
