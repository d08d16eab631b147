//! Configuration for the brokerage ledger daemon
//!
//! One YAML document (`MasterConfig`) with environment variable
//! substitution, defaults for everything but the `ledger` header, and a
//! validator that reports errors, warnings and applied defaults.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
}

/// Venue trading calendar
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    /// Fixed offset of the venue's local time from UTC
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Local session open, "HH:MM"
    #[serde(default = "default_session_open")]
    pub session_open: String,
    /// Local session close, "HH:MM"
    #[serde(default = "default_session_close")]
    pub session_close: String,
    /// Weekday names ("mon", "tuesday", ...)
    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<String>,
    /// Units per lot for market-order affordability
    #[serde(default = "default_lot_size")]
    pub lot_size: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            session_open: default_session_open(),
            session_close: default_session_close(),
            trading_days: default_trading_days(),
            lot_size: default_lot_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Run one admission batch right after startup
    #[serde(default)]
    pub admission_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            admission_on_startup: false,
        }
    }
}

/// Instruments seeded into the ledger at startup
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub instruments: Vec<InstrumentSeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentSeed {
    pub symbol: String,
    pub last_price: Decimal,
    /// Standing liquidity-provider orders for this instrument
    #[serde(default)]
    pub liquidity: Option<LiquiditySeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiquiditySeed {
    pub bid: Decimal,
    pub ask: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// pretty, json or compact
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Filter directives when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Prometheus exporter port; no exporter when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_filter: default_log_filter(),
            metrics_port: None,
        }
    }
}
