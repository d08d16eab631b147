//! OMS error types

use common::TradeId;
use matching_engine::MatchingError;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the order lifecycle
#[derive(Error, Debug)]
pub enum OmsError {
    /// Rejected at submission: zero quantity, negative price, unknown symbol...
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Trade, account or asset not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cancellation requested by someone other than the order's customer
    #[error("Trade {0} does not belong to the requesting customer")]
    NotOwner(TradeId),

    /// Order already filled, expired or cancelled
    #[error("Trade cannot be cancelled: {0}")]
    NotCancellable(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Insufficient quantity: {0}")]
    InsufficientQuantity(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Matching error
    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OmsError {
    /// Stable reason code for rejected requests
    pub fn reason_code(&self) -> &'static str {
        match self {
            OmsError::InvalidOrder(_) => "invalid_order",
            OmsError::NotFound(_) => "not_found",
            OmsError::NotOwner(_) => "not_owner",
            OmsError::NotCancellable(_) => "not_cancellable",
            OmsError::InsufficientFunds(_) => "insufficient_funds",
            OmsError::InsufficientQuantity(_) => "insufficient_quantity",
            OmsError::Storage(StorageError::Conflict(_)) => "conflict",
            OmsError::Storage(_) => "storage_error",
            OmsError::Matching(_) => "matching_error",
            OmsError::Config(_) => "config_error",
        }
    }
}

/// Result type for OMS operations
pub type Result<T> = std::result::Result<T, OmsError>;
