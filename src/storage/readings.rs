//! Reading store facade.
//!
//! Provides the storage operations used by polling workers and the query
//! path: collection creation, atomic cycle append and recent-window reads.

use sqlx::Row;

use crate::storage::StorageError;
use crate::storage::collection::CollectionName;
use crate::storage::db::SqlitePool;
use crate::storage::types::{Reading, from_micros, to_micros};

/// Default number of readings returned by a recent-window query.
pub const DEFAULT_LIMIT: u32 = 100;

/// Upper bound on a recent-window query.
pub const MAX_LIMIT: u32 = 10_000;

/// Storage facade for reading collections.
///
/// Cheap to clone; every polling worker holds its own clone.
#[derive(Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for ReadingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingStore").finish_non_exhaustive()
    }
}

impl ReadingStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the collection if it does not exist yet.
    ///
    /// Idempotent; existing readings are never touched.
    pub async fn ensure_collection(&self, name: &CollectionName) -> Result<(), StorageError> {
        let created = sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name.as_str())
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(self.pool.inner())
            .await?
            .rows_affected();

        if created > 0 {
            tracing::info!(collection = %name, "Collection created");
        }
        Ok(())
    }

    /// Append the readings of one poll cycle as a single transaction.
    ///
    /// Either every reading is stored or none is. Fails if the collection
    /// was never ensured.
    pub async fn append_cycle(
        &self,
        name: &CollectionName,
        readings: &[Reading],
    ) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.inner().begin().await?;
        for r in readings {
            sqlx::query(
                "INSERT INTO readings (collection, register_address, value, captured_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(name.as_str())
            .bind(i64::from(r.register_address))
            .bind(i64::from(r.value))
            .bind(to_micros(r.captured_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(collection = %name, count = readings.len(), "Cycle appended");
        Ok(())
    }

    /// Return up to `limit` most recent readings, newest first.
    ///
    /// Ties on `captured_at` are broken by insertion order, newest insertion
    /// first. `limit` is clamped to [`MAX_LIMIT`].
    pub async fn query_recent(
        &self,
        name: &CollectionName,
        limit: u32,
    ) -> Result<Vec<Reading>, StorageError> {
        let limit = limit.min(MAX_LIMIT);
        let rows = sqlx::query(
            "SELECT register_address, value, captured_at
             FROM readings
             WHERE collection = ?
             ORDER BY captured_at DESC, id DESC
             LIMIT ?",
        )
        .bind(name.as_str())
        .bind(i64::from(limit))
        .fetch_all(self.pool.inner())
        .await?;

        rows.iter()
            .map(|row| -> Result<Reading, StorageError> {
                let address: i64 = row.try_get("register_address")?;
                let value: i64 = row.try_get("value")?;
                let captured_at: i64 = row.try_get("captured_at")?;
                Ok(Reading {
                    register_address: to_register(address, "register_address")?,
                    value: to_register(value, "value")?,
                    captured_at: from_micros(captured_at),
                })
            })
            .collect()
    }

    /// Number of readings stored in a collection.
    pub async fn count(&self, name: &CollectionName) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM readings WHERE collection = ?")
            .bind(name.as_str())
            .fetch_one(self.pool.inner())
            .await?;
        Ok(count.try_into().unwrap_or(0))
    }

    /// All collections created so far, sorted by name.
    pub async fn collections(&self) -> Result<Vec<CollectionName>, StorageError> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(self.pool.inner())
            .await?;
        Ok(names.into_iter().map(CollectionName::from_stored).collect())
    }

    /// Whether the collection has been created.
    pub async fn has_collection(&self, name: &CollectionName) -> Result<bool, StorageError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM collections WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(found.is_some())
    }

    /// Cheap round trip used by readiness checks.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }
}

fn to_register(raw: i64, column: &str) -> Result<u16, StorageError> {
    u16::try_from(raw)
        .map_err(|_| StorageError::InvalidData(format!("{column} out of range: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageBuilder, StorageHandles, poll_cycle, sanitize};
    use chrono::{Duration, Utc};
    use tempfile::{TempDir, tempdir};

    async fn open_store() -> (StorageHandles, TempDir) {
        let dir = tempdir().unwrap();
        let handles = StorageBuilder::new(dir.path().join("readings.db"))
            .build()
            .await
            .unwrap();
        (handles, dir)
    }

    #[tokio::test]
    async fn test_append_then_query_roundtrip() {
        let (handles, _dir) = open_store().await;
        let store = &handles.store;
        let name = sanitize("10.0.0.1");
        store.ensure_collection(&name).await.unwrap();

        let values: Vec<u16> = (0..10).collect();
        let ts = Utc::now();
        store
            .append_cycle(&name, &poll_cycle(0, &values, ts))
            .await
            .unwrap();

        let recent = store.query_recent(&name, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        let mut pairs: Vec<(u16, u16)> = recent
            .iter()
            .map(|r| (r.register_address, r.value))
            .collect();
        pairs.sort();
        assert_eq!(pairs, (0..10).map(|i| (i, i)).collect::<Vec<_>>());
        assert!(recent.iter().all(|r| r.captured_at.timestamp_micros() == ts.timestamp_micros()));

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_query_recent_newest_first() {
        let (handles, _dir) = open_store().await;
        let store = &handles.store;
        let name = sanitize("10.0.0.2");
        store.ensure_collection(&name).await.unwrap();

        let t0 = Utc::now() - Duration::seconds(10);
        let t1 = t0 + Duration::seconds(5);
        store.append_cycle(&name, &poll_cycle(0, &[1, 2], t0)).await.unwrap();
        store.append_cycle(&name, &poll_cycle(0, &[3, 4], t1)).await.unwrap();

        let recent = store.query_recent(&name, 10).await.unwrap();
        let values: Vec<u16> = recent.iter().map(|r| r.value).collect();
        // Newest cycle first; within a cycle the later insertion comes first
        assert_eq!(values, vec![4, 3, 2, 1]);

        let limited = store.query_recent(&name, 3).await.unwrap();
        assert_eq!(limited.len(), 3);
        assert!(store.query_recent(&name, 0).await.unwrap().is_empty());

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let (handles, _dir) = open_store().await;
        let store = &handles.store;
        let name = sanitize("10.0.0.3");

        store.ensure_collection(&name).await.unwrap();
        store
            .append_cycle(&name, &poll_cycle(0, &[5; 10], Utc::now()))
            .await
            .unwrap();
        store.ensure_collection(&name).await.unwrap();

        assert_eq!(store.count(&name).await.unwrap(), 10);
        assert_eq!(store.collections().await.unwrap(), vec![name.clone()]);
        assert!(store.has_collection(&name).await.unwrap());
        assert!(!store.has_collection(&sanitize("10.0.0.4")).await.unwrap());

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_append_requires_collection() {
        let (handles, _dir) = open_store().await;
        let store = &handles.store;
        let name = sanitize("10.0.0.4");

        let result = store
            .append_cycle(&name, &poll_cycle(0, &[1, 2, 3], Utc::now()))
            .await;
        assert!(result.is_err());
        // All-or-nothing: nothing from the failed cycle is visible
        assert_eq!(store.count(&name).await.unwrap(), 0);

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let (handles, _dir) = open_store().await;
        let store = &handles.store;
        let a = sanitize("10.0.0.5");
        let b = sanitize("10.0.0.6");
        store.ensure_collection(&a).await.unwrap();
        store.ensure_collection(&b).await.unwrap();

        store.append_cycle(&a, &poll_cycle(0, &[1; 4], Utc::now())).await.unwrap();
        store.append_cycle(&b, &poll_cycle(0, &[2; 6], Utc::now())).await.unwrap();

        let from_a = store.query_recent(&a, 100).await.unwrap();
        assert_eq!(from_a.len(), 4);
        assert!(from_a.iter().all(|r| r.value == 1));
        assert_eq!(store.count(&b).await.unwrap(), 6);

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_appends_across_collections() {
        let (handles, _dir) = open_store().await;
        let mut tasks = Vec::new();

        for device in 0..4u16 {
            let store = handles.store.clone();
            tasks.push(tokio::spawn(async move {
                let name = sanitize(&format!("10.1.0.{device}"));
                store.ensure_collection(&name).await.unwrap();
                for _ in 0..5 {
                    store
                        .append_cycle(&name, &poll_cycle(0, &[device; 10], Utc::now()))
                        .await
                        .unwrap();
                }
                name
            }));
        }

        for task in tasks {
            let name = task.await.unwrap();
            assert_eq!(handles.store.count(&name).await.unwrap(), 50);
        }

        handles.shutdown().await;
    }

    #[test]
    fn test_to_register_range() {
        assert_eq!(to_register(65535, "value").unwrap(), u16::MAX);
        assert!(to_register(-1, "value").is_err());
        assert!(to_register(70_000, "value").is_err());
    }
}
