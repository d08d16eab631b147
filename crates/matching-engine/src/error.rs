//! Matching engine error types

use common::TradeId;
use settlement::SettlementError;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur during order matching
#[derive(Error, Debug)]
pub enum MatchingError {
    /// The order cannot enter a matching pass
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Concurrent writers kept invalidating the order
    #[error("Trade {0} kept changing underneath the matching pass")]
    Contention(TradeId),

    /// Settlement of a fill failed
    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MatchingError {
    /// True for data-integrity failures (missing account, asset or instrument)
    pub fn is_not_found(&self) -> bool {
        matches!(self, MatchingError::Settlement(SettlementError::NotFound(_)))
    }
}
