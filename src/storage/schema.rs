use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::{is_lock_error, StoreError};

/// Default number of entries returned by `get_recent` for a non-positive limit
pub const DEFAULT_RECENT_LIMIT: i64 = 10;

/// Versioned schema changes, applied in order and recorded in `schema_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_create_entries",
        r#"
        CREATE TABLE entries (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            link TEXT UNIQUE NOT NULL CHECK (link <> ''),
            description TEXT NOT NULL,
            published_at INTEGER NOT NULL,
            fetched_at INTEGER NOT NULL
        )
    "#,
    ),
    (
        "0002_index_entries_published",
        "CREATE INDEX idx_entries_published ON entries(published_at DESC)",
    ),
];

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed entry store.
///
/// Cheap to clone; all clones share one connection pool. Writes go through an
/// async mutex so concurrent feed saves never contend for the SQLite write lock.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) write_lock: Arc<Mutex<()>>,
    pub(crate) default_limit: i64,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `path` is a file path or `:memory:`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Migration` if the schema could not be brought up to date.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Set via pragma() so every pooled
        // connection inherits it.
        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        if path != ":memory:" {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            default_limit: DEFAULT_RECENT_LIMIT,
        };
        db.migrate().await.map_err(|e| {
            if is_lock_error(&e.to_string()) {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;

        tracing::info!(path = %path, "Database ready");
        Ok(db)
    }

    /// Sets the limit used by `get_recent` when callers pass zero or less.
    /// Non-positive values are ignored.
    pub fn with_default_limit(mut self, limit: i64) -> Self {
        if limit > 0 {
            self.default_limit = limit;
        }
        self
    }

    pub fn default_limit(&self) -> i64 {
        self.default_limit
    }

    /// Close every pooled connection. Call once all writers have finished.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }

    /// Run pending migrations atomically within a single transaction.
    ///
    /// Each migration runs at most once; its id is recorded in
    /// `schema_migrations` in the same transaction as its DDL.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        let applied: Vec<(String,)> = sqlx::query_as("SELECT id FROM schema_migrations")
            .fetch_all(&self.pool)
            .await?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut applied_count = 0;

        for (id, sql) in MIGRATIONS {
            if applied.iter().any(|(done,)| done == id) {
                continue;
            }
            tracing::info!(id = %id, "Applying migration");
            sqlx::query(sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_migrations (id, applied_at) VALUES (?, ?)")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            applied_count += 1;
        }

        tx.commit().await?;

        if applied_count > 0 {
            tracing::info!(count = applied_count, "Database migrations applied");
        } else {
            tracing::debug!("Database schema is up to date");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_applies_migrations() {
        let db = Database::open(":memory:").await.unwrap();
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM schema_migrations ORDER BY id")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        let ids: Vec<String> = ids.into_iter().map(|(id,)| id).collect();
        assert_eq!(ids, vec!["0001_create_entries", "0002_index_entries_published"]);
    }

    #[tokio::test]
    async fn test_reopen_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.close().await;

        let db = Database::open(path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_default_limit_ignores_non_positive() {
        let db = Database::open(":memory:").await.unwrap();
        assert_eq!(db.default_limit(), DEFAULT_RECENT_LIMIT);
        let db = db.with_default_limit(0);
        assert_eq!(db.default_limit(), DEFAULT_RECENT_LIMIT);
        let db = db.with_default_limit(25);
        assert_eq!(db.default_limit(), 25);
    }
}
