//! Storage engine error types
//!
//! Defines all errors that can occur in the storage layer.

use crate::transform::TransformError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed query or datapoint (conflicting addressing, bad duration, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Write would violate the non-overlap invariant or ordering rules
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Requested stream does not exist
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Transform failed to compile or evaluate
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Backing store failure
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Write source failed while being drained
    #[error("Source error: {0}")]
    Source(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StorageError {
    /// True for errors that leave storage untouched because the input was rejected
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
                StorageError::Conflict(
                    msg.unwrap_or_else(|| "datapoint conflicts with existing data".to_string()),
                )
            }
            other => StorageError::Sqlite(other),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::StreamNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Stream not found: abc");

        let err = StorageError::Conflict("datapoint older than existing data".to_string());
        assert_eq!(err.to_string(), "Conflict: datapoint older than existing data");
    }

    #[test]
    fn test_constraint_violation_is_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err: StorageError = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err().into();
        assert!(err.is_conflict());

        let err: StorageError = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, StorageError::Sqlite(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }
}
