use async_trait::async_trait;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::store::EntryStore;
use super::types::{EntryRow, StoreError};
use crate::feed::Entry;

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of entries to return from any single query (OOM protection)
const MAX_ENTRIES: i64 = 2000;

/// 5 columns * 50 = 250 parameters, well under SQLite's 999 limit
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Insert entries, skipping any whose link is already stored or empty.
    ///
    /// Returns the number of rows actually inserted, counted with `changes()`
    /// after each chunk. The whole batch commits or rolls back together.
    pub async fn save_entries(&self, entries: &[Entry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let mut total_inserted: usize = 0;

        for chunk in entries.chunks(BATCH_SIZE) {
            let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO entries (title, link, description, published_at, fetched_at) ",
            );

            insert_builder.push_values(chunk, |mut b, entry| {
                b.push_bind(&entry.title)
                    .push_bind(&entry.link)
                    .push_bind(&entry.description)
                    .push_bind(entry.published_at.timestamp())
                    .push_bind(now);
            });

            insert_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;

            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            total_inserted += changes.0 as usize;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;

        tracing::debug!(
            attempted = entries.len(),
            inserted = total_inserted,
            "Saved entries"
        );
        Ok(total_inserted)
    }

    /// Most recently published entries, newest first.
    ///
    /// `limit <= 0` falls back to the configured default; anything above
    /// 2000 is clamped.
    pub async fn get_recent(&self, limit: i64) -> Result<Vec<Entry>, StoreError> {
        let limit = if limit <= 0 { self.default_limit } else { limit };
        let limit = limit.min(MAX_ENTRIES);

        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT title, link, description, published_at
            FROM entries
            ORDER BY published_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(rows.into_iter().filter_map(EntryRow::into_entry).collect())
    }

    /// Total number of stored entries.
    pub async fn count_entries(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(count)
    }
}

#[async_trait]
impl EntryStore for Database {
    async fn save_entries(&self, entries: &[Entry]) -> Result<usize, StoreError> {
        Database::save_entries(self, entries).await
    }

    async fn get_recent(&self, limit: i64) -> Result<Vec<Entry>, StoreError> {
        Database::get_recent(self, limit).await
    }
}
