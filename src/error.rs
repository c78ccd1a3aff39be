//! Error types for nodemirror.
//!
//! One taxonomy for the whole engine:
//! - Parse errors are fatal and raised before any transaction opens
//! - Lock contention is transient and retried by [`crate::storage::retry`]
//! - Migration and constraint errors are fatal and roll the active
//!   transaction back

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for nodemirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while syncing an export into the store.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Export file not found: {path}")]
    ExportNotFound { path: PathBuf },

    #[error("Malformed export: {0}")]
    Parse(String),

    #[error("Database is locked: {op} gave up after {attempts} attempts")]
    Busy { op: String, attempts: u32 },

    #[error("Migration {version} failed: {source}")]
    Migration {
        version: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is SQLite lock contention (`SQLITE_BUSY` or
    /// `SQLITE_LOCKED`), the only class the retry wrapper retries.
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn test_busy_is_lock_contention() {
        assert!(busy_error().is_lock_contention());
    }

    #[test]
    fn test_parse_is_not_lock_contention() {
        let err = Error::Parse("bad json".into());
        assert!(!err.is_lock_contention());
    }

    #[test]
    fn test_constraint_is_not_lock_contention() {
        let err = Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!err.is_lock_contention());
    }
}
