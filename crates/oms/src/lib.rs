//! Order lifecycle for the brokerage ledger
//!
//! This crate drives orders from submission to a terminal state.
//!
//! # Features
//!
//! - Order submission with funds/unit reservation
//! - Admission gate: match inside the trading session, defer outside it
//! - Admission batch at session open, in submission order
//! - Expiry batch at session close (liquidity-provider orders persist)
//! - Customer cancellation
//! - Session scheduler and startup market seeding

pub mod calendar;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod market;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use calendar::TradingCalendar;
pub use error::{OmsError, Result};
pub use lifecycle::Lifecycle;
pub use manager::OrderManager;
pub use market::{seed_market, SeedSummary};
pub use scheduler::{ScheduledBatch, Scheduler};
pub use types::{Admission, BatchKind, BatchReport, OrderRequest};
