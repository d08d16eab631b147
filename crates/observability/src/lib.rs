//! Observability infrastructure for the brokerage ledger
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - The ledger metric set shared by matching and the lifecycle batches
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat, LogSettings};
//!
//! init_logging(&LogSettings::new("brokerd", LogFormat::Json, "info"))?;
//! observability::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogSettings};
pub use metrics::{init_metrics, LedgerMetrics};
