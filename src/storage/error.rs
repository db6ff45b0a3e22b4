//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, timeout, bad data).

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// No connection could be acquired within the configured bound.
    #[error("timed out waiting for a database connection")]
    Timeout,

    /// Invalid data in database (e.g., out-of-range register value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., filesystem setup failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::Timeout,
            other => Self::Database(other),
        }
    }
}

impl StorageError {
    /// Returns true when the failure came from a bounded wait expiring,
    /// either on the pool or on SQLite's busy handler.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_maps_to_timeout() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::Timeout));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_other_errors_are_database() {
        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Database(_)));
        assert!(!err.is_timeout());
        assert!(err.to_string().starts_with("database error"));
    }
}
