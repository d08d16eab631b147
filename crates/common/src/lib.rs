//! Common types and utilities for the brokerage ledger
//!
//! This crate provides the ledger entities shared by every other crate:
//! orders ("trades"), accounts, portfolio assets, instruments and transfers.
//!
//! # Modules
//!
//! - [`clock`] - Wall-clock abstraction
//! - [`error`] - Common error types
//! - [`types`] - Ledger entities and identifiers
//! - [`money`] - Decimal helpers (weighted averages)

pub mod clock;
pub mod error;
pub mod money;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use types::*;

pub use rust_decimal::Decimal;
