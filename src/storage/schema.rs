//! Database schema definitions.

use sqlx::SqlitePool;

use crate::storage::StorageError;

/// Registry of known collections.
///
/// A row is inserted by `ensure_collection` and never removed.
pub const COLLECTIONS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name       TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);
"#;

/// Append-only readings shared by every collection.
///
/// `captured_at` holds microseconds since the Unix epoch and defaults to the
/// write time when a caller does not supply one.
pub const READINGS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS readings (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    collection       TEXT NOT NULL REFERENCES collections(name),
    register_address INTEGER NOT NULL,
    value            INTEGER NOT NULL,
    captured_at      INTEGER NOT NULL
        DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000000 AS INTEGER))
);
"#;

/// Index backing the recent-window query.
pub const READINGS_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_readings_collection_time
    ON readings (collection, captured_at DESC, id DESC);
"#;

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for ddl in [COLLECTIONS_TABLE_DDL, READINGS_TABLE_DDL, READINGS_INDEX_DDL] {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}
