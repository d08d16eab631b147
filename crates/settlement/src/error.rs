//! Settlement error types

use storage::StorageError;
use thiserror::Error;

/// Errors that can occur during settlement operations
#[derive(Error, Debug)]
pub enum SettlementError {
    /// A referenced account, asset or instrument is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The pair or quantity cannot be settled
    #[error("Invalid fill: {0}")]
    InvalidFill(String),

    /// Storage error, including version conflicts
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SettlementError {
    /// True when the failure came from a concurrent writer
    pub fn is_conflict(&self) -> bool {
        matches!(self, SettlementError::Storage(StorageError::Conflict(_)))
    }
}
