//! Settlement procedure for the brokerage ledger
//!
//! Executes exactly one fill between a buy and a sell order: moves funds
//! between the two accounts, transfers the position between portfolios,
//! records realized gain/loss, updates the instrument's last price and
//! advances both orders. Every mutation of one fill lands in a single
//! [`storage::UnitOfWork`], so a failure leaves the ledger untouched.

pub mod error;
pub mod service;

pub use error::SettlementError;
pub use service::{Fill, SettlementOutcome, SettlementService};

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;
