//! Order Matching Engine for the brokerage ledger
//!
//! Matches one incoming order at a time against the resting orders of its
//! instrument using price/time priority:
//!
//! - limit orders cross the best opposing limit price first, then sweep
//!   resting market orders in submission order
//! - market buys walk the asks while reserved funds cover at least one lot
//! - market sells walk the bids unconditionally
//!
//! Every fill is handed to [`settlement::SettlementService`], which commits
//! it atomically. Pairings between two orders of the same customer are
//! skipped and the next counterparty is tried.

pub mod book;
pub mod engine;
pub mod error;
pub mod result;

pub use engine::MatchingEngine;
pub use error::MatchingError;
pub use result::MatchResult;

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, MatchingError>;

/// Default quantization unit for market-order affordability
pub const DEFAULT_LOT_SIZE: u32 = 100;
