//! Storage error types

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record changed since it was read, or a unique key already exists.
    /// Nothing from the rejected unit of work was written.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Backend (connection, query, transaction) error
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
