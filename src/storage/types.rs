use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::Entry;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds a lock on the database file
    #[error("Another instance of newsroom appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Other(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for entry queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: i64,
}

impl EntryRow {
    /// Returns `None` (and logs) when the stored timestamp is out of range.
    pub(crate) fn into_entry(self) -> Option<Entry> {
        let Some(published_at) = DateTime::<Utc>::from_timestamp(self.published_at, 0) else {
            tracing::warn!(
                link = %self.link,
                published_at = self.published_at,
                "Stored entry has an invalid publish time, skipping row"
            );
            return None;
        };
        Some(Entry {
            title: self.title,
            link: self.link,
            description: self.description,
            published_at,
        })
    }
}
