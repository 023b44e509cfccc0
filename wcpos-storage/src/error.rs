//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data read back from a store.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),

    /// The backing store rejected the operation.
    #[error("store error: {0}")]
    Backend(String),
}

impl From<wcpos_types::Error> for StorageError {
    fn from(e: wcpos_types::Error) -> Self {
        StorageError::InvalidData(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Task(e.to_string())
    }
}
