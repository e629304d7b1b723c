use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use feed_rs::parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::fetcher::FeedBody;
use super::model::{Entry, Feed};

/// Formats carrying a numeric zone, tried in order.
const NUMERIC_ZONE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z", // RFC 1123
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %y %H:%M %z", // RFC 822
    "%d %b %y %H:%M %z",
];

/// Same layouts as above, with the zone given as a name (GMT, EST, ...).
const NAMED_ZONE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%a, %d %b %y %H:%M",
    "%d %b %y %H:%M",
];

/// Errors that make a whole feed document unusable.
///
/// Individual entries with a bad date or no link are not errors; they are
/// skipped and reported with a warning.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The surrounding cycle was cancelled before parsing started
    #[error("Parse cancelled")]
    Cancelled,
    /// The document could not be decoded as RSS, Atom or JSON Feed
    #[error("Failed to decode feed: {0}")]
    Malformed(#[from] parser::ParseFeedError),
}

#[derive(Debug, Error)]
#[error("Could not parse date in any known format: {0:?}")]
pub struct DateParseError(String);

/// Turns a fetched document into a normalized [`Feed`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedParser: Send + Sync {
    async fn parse(&self, cancel: &CancellationToken, body: FeedBody) -> Result<Feed, ParseError>;
}

/// [`FeedParser`] for RSS 0.9x/1.0/2.0, Atom and JSON Feed documents.
#[derive(Clone)]
pub struct SyndicationParser {
    span: tracing::Span,
}

impl SyndicationParser {
    pub fn new(span: tracing::Span) -> Self {
        Self { span }
    }
}

#[async_trait]
impl FeedParser for SyndicationParser {
    async fn parse(&self, cancel: &CancellationToken, body: FeedBody) -> Result<Feed, ParseError> {
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        self.span.in_scope(|| parse_feed(body.as_bytes()))
    }
}

/// Parses a feed document, dropping entries that cannot be stored.
///
/// An entry is kept only if it has a link and a publish date that
/// [`parse_pub_date`] understands. The `updated` date stands in when there is
/// no `published` date; Atom only requires `updated`.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, ParseError> {
    let feed = parser::Builder::new()
        .timestamp_parser(read_timestamp)
        .build()
        .parse(bytes)
        .map_err(|e| {
            tracing::error!(error = %e, "Error decoding feed");
            ParseError::Malformed(e)
        })?;

    let mut entries = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0usize;

    for entry in feed.entries {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let link = entry
            .links
            .into_iter()
            .map(|l| l.href.trim().to_string())
            .find(|href| !href.is_empty());

        let Some(link) = link else {
            tracing::warn!(item_title = %title, "Item has no link, skipping item");
            skipped += 1;
            continue;
        };

        let Some(published_at) = entry.published.or(entry.updated) else {
            tracing::warn!(
                item_title = %title,
                link = %link,
                "Could not parse item publish date, skipping item"
            );
            skipped += 1;
            continue;
        };

        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        entries.push(Entry {
            title,
            link,
            description,
            published_at,
        });
    }

    if skipped > 0 {
        tracing::debug!(kept = entries.len(), skipped = skipped, "Dropped unusable items");
    }

    Ok(Feed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: feed
            .links
            .into_iter()
            .next()
            .map(|l| l.href)
            .unwrap_or_default(),
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        entries,
    })
}

/// Timestamp hook for feed-rs. The item is dropped later without its date
/// text, so the rejected text is logged here.
fn read_timestamp(text: &str) -> Option<DateTime<Utc>> {
    match parse_pub_date(text) {
        Ok(ts) => Some(ts),
        Err(e) => {
            tracing::debug!(pub_date = %text.trim(), error = %e, "Rejected item date");
            None
        }
    }
}

/// Parses a feed timestamp, trying each known layout in a fixed order.
///
/// Order: RFC 1123 with a numeric zone, RFC 1123 with a named zone, RFC 822
/// with a numeric zone, RFC 822 with a named zone, then RFC 3339. Any named
/// zone (`GMT`, `EST`, `MST`, ...) is read as `+0000`: the wall-clock time is
/// kept and the abbreviation carries no offset.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use newsroom::feed::parse_pub_date;
///
/// let ts = parse_pub_date("Tue, 03 Jan 2006 12:00:00 GMT").unwrap();
/// assert_eq!(ts, Utc.with_ymd_and_hms(2006, 1, 3, 12, 0, 0).unwrap());
/// assert!(parse_pub_date("not-a-date").is_err());
/// ```
pub fn parse_pub_date(text: &str) -> Result<DateTime<Utc>, DateParseError> {
    let text = text.trim();
    let named_zone_local = text
        .rsplit_once(' ')
        .filter(|(_, zone)| !zone.is_empty() && zone.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|(local, _)| local);

    for (index, format) in NUMERIC_ZONE_FORMATS.iter().enumerate() {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Ok(ts.with_timezone(&Utc));
        }

        if let Some(local) = named_zone_local {
            if let Ok(naive) = NaiveDateTime::parse_from_str(local, NAMED_ZONE_FORMATS[index]) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
        }
    }

    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| DateParseError(text.to_string()))
}
