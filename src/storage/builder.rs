//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing the storage facade.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::StorageError;
use crate::storage::db::{
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS, PoolSettings,
    SqlitePool,
};
use crate::storage::readings::ReadingStore;
use crate::storage::schema::init_schema;

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    db_path: PathBuf,
    pool_size: u32,
    acquire_timeout: Duration,
    busy_timeout: Duration,
}

impl StorageBuilder {
    /// Create a new storage builder for the database file at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            pool_size: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Set the maximum number of pooled connections.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set how long an operation may wait for a pooled connection.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set how long SQLite may wait on a lock held by another writer.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Build the storage layer and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let settings = PoolSettings {
            max_connections: self.pool_size.max(1),
            acquire_timeout: self.acquire_timeout,
            busy_timeout: self.busy_timeout,
        };
        let pool = SqlitePool::open(&self.db_path, &settings).await?;
        init_schema(pool.inner()).await?;

        tracing::info!(path = %self.db_path.display(), pool_size = settings.max_connections, "Storage opened");

        Ok(StorageHandles {
            store: ReadingStore::new(pool.clone()),
            pool,
        })
    }
}

/// Handles to the storage layer.
pub struct StorageHandles {
    /// Reading store facade; clone it for each worker.
    pub store: ReadingStore,
    pool: SqlitePool,
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn shutdown(self) {
        self.pool.close().await;
        tracing::info!("Storage closed");
    }
}
