use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::util::display_name_from_url;

/// One normalized news item.
///
/// `link` is the natural identity of an entry: the store keeps at most one
/// row per link, so re-ingesting an unchanged feed never duplicates entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

/// A remote source as it looked during one processing cycle.
///
/// Never persisted as a unit; only its entries reach the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub entries: Vec<Entry>,
}

/// A configured feed: a display name and the address to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
}

/// Immutable view over the configured sources.
///
/// Keeps configuration order for scheduling and an address → name map that
/// is only used to label diagnostics.
#[derive(Debug, Clone, Default)]
pub struct FeedDirectory {
    urls: Vec<String>,
    names: HashMap<String, String>,
}

impl FeedDirectory {
    pub fn new(sources: &[FeedSource]) -> Self {
        let mut urls = Vec::with_capacity(sources.len());
        let mut names = HashMap::with_capacity(sources.len());
        for source in sources {
            if !names.contains_key(&source.url) {
                names.insert(source.url.clone(), source.name.clone());
                urls.push(source.url.clone());
            }
        }
        Self { urls, names }
    }

    /// Configured addresses in configuration order, duplicates removed.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Human readable label for a feed address.
    ///
    /// Falls back to the address host (without a leading `www.`) when no name
    /// is configured, and to `"Unknown"` when the address has no host.
    pub fn display_name(&self, url: &str) -> String {
        match self.names.get(url) {
            Some(name) => name.clone(),
            None => display_name_from_url(url),
        }
    }
}
