//! Ledger store for the brokerage ledger
//!
//! This crate provides the persistence boundary the matching and settlement
//! core works against: keyed lookups plus one atomic `commit` of a
//! [`UnitOfWork`].
//!
//! # Feature Flags
//!
//! - `postgres` - Enable PostgreSQL storage

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryLedgerStore;
pub use traits::{LedgerStore, UnitOfWork};

#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;
