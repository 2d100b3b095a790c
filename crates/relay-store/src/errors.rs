//! Error types for the `SQLite` backend.
//!
//! [`DbError`] is returned by the pool, migration, and repository layers. At
//! the [`relay_core::RecordStore`] boundary it is folded into
//! [`relay_core::StoreError`].

use relay_core::StoreError;
use thiserror::Error;

/// Errors raised by the `SQLite` layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },
}

/// Convenience type alias for `SQLite` layer results.
pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Serde(e) => StoreError::Serde(e),
            other => StoreError::Backend(Box::new(other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn migration_error_display() {
        let err = DbError::Migration {
            message: "v001 failed: table already exists".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration error: v001 failed: table already exists"
        );
    }

    #[test]
    fn sqlite_error_becomes_backend_store_error() {
        let err: StoreError = DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows).into();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn serde_error_stays_serde() {
        let serde_err = serde_json::from_str::<String>("bad").unwrap_err();
        let err: StoreError = DbError::Serde(serde_err).into();
        assert!(matches!(err, StoreError::Serde(_)));
    }
}
