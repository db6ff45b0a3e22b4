//! SQLite backend implementation using sqlx.
//!
//! Provides connection pooling with bounded waits for SQLite.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};

use crate::storage::StorageError;

/// Default maximum connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default bound on waiting for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on waiting for a SQLite lock held by another writer.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// SQLite connection pool wrapper.
///
/// Wraps sqlx's SqlitePool with WAL mode and bounded waits, so a contended
/// database surfaces an error instead of blocking a caller indefinitely.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool").finish_non_exhaustive()
    }
}

impl SqlitePool {
    /// Open (creating if missing) the database file at `path`.
    ///
    /// # Configuration
    ///
    /// - WAL journal mode so readers never block the writer
    /// - Normal synchronous mode for performance with durability
    /// - `busy_timeout` bounds lock waits, `acquire_timeout` bounds pool waits
    pub async fn open(path: &Path, settings: &PoolSettings) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(settings.busy_timeout)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { inner: pool })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_pool_open() {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::open(&dir.path().join("pool.db"), &PoolSettings::default())
            .await
            .unwrap();
        assert!(!pool.is_closed());

        let row: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(row.0, 1);

        pool.close().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_sqlite_pool_wal_mode() {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::open(&dir.path().join("wal.db"), &PoolSettings::default())
            .await
            .unwrap();

        let row: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(row.0, "wal");

        pool.close().await;
    }

    #[tokio::test]
    async fn test_acquire_is_bounded() {
        let dir = tempdir().unwrap();
        let settings = PoolSettings {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(100),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        let pool = SqlitePool::open(&dir.path().join("bounded.db"), &settings)
            .await
            .unwrap();

        let _held = pool.inner().acquire().await.unwrap();
        let err = pool.inner().acquire().await.unwrap_err();
        assert!(StorageError::from(err).is_timeout());
    }
}
