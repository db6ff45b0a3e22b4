//! Database abstraction layer.
//!
//! The abstraction is intentionally minimal:
//! - `SqlitePool`: connection pool wrapper for SQLite with bounded waits
//! - `PoolSettings`: pool size and wait bounds
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::open(Path::new("data/regtrace.db"), &PoolSettings::default()).await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::{
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS, PoolSettings,
    SqlitePool,
};
