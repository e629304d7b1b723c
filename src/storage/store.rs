use async_trait::async_trait;

use super::types::StoreError;
use crate::feed::Entry;

/// Durable entry storage with duplicate suppression on `link`.
///
/// Implementations must be safe for concurrent callers; the processor shares
/// one store across every feed in a cycle without further locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Persists a batch atomically and returns how many rows were newly inserted.
    /// Entries whose link is already stored are skipped. An empty batch is `Ok(0)`.
    async fn save_entries(&self, entries: &[Entry]) -> Result<usize, StoreError>;

    /// Most recently published entries first. `limit <= 0` uses the store's default.
    async fn get_recent(&self, limit: i64) -> Result<Vec<Entry>, StoreError>;
}
