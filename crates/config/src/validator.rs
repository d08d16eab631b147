use crate::*;
use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Ledger name is required")]
    MissingLedgerName,

    #[error("Invalid version format: {0}. Must be in format X.Y.Z (e.g., 1.0.0)")]
    InvalidVersionFormat(String),

    #[error("Invalid time format '{time}' for {field}: expected HH:MM")]
    InvalidTimeFormat { field: String, time: String },

    #[error("Session open {open} must be before session close {close}")]
    InvalidSessionWindow { open: String, close: String },

    #[error("utc_offset_hours must be between -12 and 14, got {0}")]
    InvalidUtcOffset(i32),

    #[error("At least one trading day is required")]
    NoTradingDays,

    #[error("Invalid trading day '{0}'")]
    InvalidTradingDay(String),

    #[error("lot_size must be a positive integer")]
    InvalidLotSize,

    #[error("Instrument symbol must not be empty")]
    EmptySymbol,

    #[error("Duplicate instrument symbol '{0}'")]
    DuplicateSymbol(String),

    #[error("Instrument {symbol}: {message}")]
    InvalidInstrument { symbol: String, message: String },

    #[error("Storage: {message}")]
    InvalidStorage { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a local session time ("HH:MM")
pub fn parse_session_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

/// Parse a weekday name ("mon", "Monday", ...)
pub fn parse_trading_day(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_ledger(&config.ledger, &mut report);
    validate_trading(&config.trading, &mut report);
    validate_storage(&config.storage, &mut report);
    validate_scheduler(&config.scheduler, &mut report);
    validate_market(&config.market, &mut report);
    validate_observability(&config.observability, &mut report);

    report
}

fn validate_ledger(ledger: &LedgerConfig, report: &mut ValidationReport) {
    if ledger.name.trim().is_empty() {
        report.add_error(ValidationError::MissingLedgerName);
    }

    let version_ok = Regex::new(r"^\d+\.\d+\.\d+$")
        .map(|re| re.is_match(&ledger.version))
        .unwrap_or(false);
    if !version_ok {
        report.add_error(ValidationError::InvalidVersionFormat(ledger.version.clone()));
    }

    if ledger.description.is_empty() {
        report.add_warning("ledger.description", "No description set");
    }
}

fn validate_trading(trading: &TradingConfig, report: &mut ValidationReport) {
    if !(-12..=14).contains(&trading.utc_offset_hours) {
        report.add_error(ValidationError::InvalidUtcOffset(trading.utc_offset_hours));
    }

    let open = parse_session_time(&trading.session_open);
    let close = parse_session_time(&trading.session_close);
    if open.is_none() {
        report.add_error(ValidationError::InvalidTimeFormat {
            field: "trading.session_open".to_string(),
            time: trading.session_open.clone(),
        });
    }
    if close.is_none() {
        report.add_error(ValidationError::InvalidTimeFormat {
            field: "trading.session_close".to_string(),
            time: trading.session_close.clone(),
        });
    }
    if let (Some(open), Some(close)) = (open, close) {
        if open >= close {
            report.add_error(ValidationError::InvalidSessionWindow {
                open: trading.session_open.clone(),
                close: trading.session_close.clone(),
            });
        }
    }

    if trading.trading_days.is_empty() {
        report.add_error(ValidationError::NoTradingDays);
    }
    let mut days = HashSet::new();
    for day in &trading.trading_days {
        match parse_trading_day(day) {
            Some(weekday) => {
                if !days.insert(weekday) {
                    report.add_warning("trading.trading_days", &format!("'{}' listed twice", day));
                }
            }
            None => report.add_error(ValidationError::InvalidTradingDay(day.clone())),
        }
    }

    if trading.lot_size == 0 {
        report.add_error(ValidationError::InvalidLotSize);
    }
}

fn validate_storage(storage: &StorageConfig, report: &mut ValidationReport) {
    match storage.backend {
        StorageBackend::Memory => {
            report.add_warning(
                "storage.backend",
                "In-memory storage loses all ledger state on restart",
            );
        }
        StorageBackend::Postgres => {
            let Some(postgres) = &storage.postgres else {
                report.add_error(ValidationError::InvalidStorage {
                    message: "postgres backend requires a storage.postgres section".to_string(),
                });
                return;
            };

            let unresolved = unresolved_env_vars(&postgres.url);
            if !unresolved.is_empty() {
                for var in unresolved {
                    report.add_error(ValidationError::InvalidEnvVar {
                        var,
                        message: "referenced by storage.postgres.url".to_string(),
                    });
                }
            } else {
                match url::Url::parse(&postgres.url) {
                    Ok(url) if matches!(url.scheme(), "postgres" | "postgresql") => {}
                    Ok(url) => report.add_error(ValidationError::InvalidStorage {
                        message: format!("unsupported url scheme '{}'", url.scheme()),
                    }),
                    Err(e) => report.add_error(ValidationError::InvalidStorage {
                        message: format!("invalid url: {}", e),
                    }),
                }
            }

            if postgres.max_connections == 0 {
                report.add_error(ValidationError::InvalidStorage {
                    message: "max_connections must be a positive integer".to_string(),
                });
            }
        }
    }
}

fn validate_scheduler(scheduler: &SchedulerConfig, report: &mut ValidationReport) {
    if !scheduler.enabled {
        report.add_warning(
            "scheduler.enabled",
            "Scheduler disabled: orders outside the session wait for a manual admission batch",
        );
    }
}

fn validate_market(market: &MarketConfig, report: &mut ValidationReport) {
    if market.instruments.is_empty() {
        report.add_warning("market.instruments", "No instruments seeded; every submission will be rejected until stocks exist");
        return;
    }

    let mut seen = HashSet::new();
    for instrument in &market.instruments {
        let symbol = instrument.symbol.trim();
        if symbol.is_empty() {
            report.add_error(ValidationError::EmptySymbol);
            continue;
        }
        if !seen.insert(symbol.to_string()) {
            report.add_error(ValidationError::DuplicateSymbol(symbol.to_string()));
        }
        if instrument.last_price <= Decimal::ZERO {
            report.add_error(ValidationError::InvalidInstrument {
                symbol: symbol.to_string(),
                message: "last_price must be positive".to_string(),
            });
        }

        match &instrument.liquidity {
            Some(liquidity) => {
                if liquidity.bid <= Decimal::ZERO || liquidity.ask <= Decimal::ZERO {
                    report.add_error(ValidationError::InvalidInstrument {
                        symbol: symbol.to_string(),
                        message: "liquidity bid and ask must be positive".to_string(),
                    });
                } else if liquidity.bid >= liquidity.ask {
                    report.add_error(ValidationError::InvalidInstrument {
                        symbol: symbol.to_string(),
                        message: format!(
                            "liquidity bid {} must be below ask {}",
                            liquidity.bid, liquidity.ask
                        ),
                    });
                }
                if liquidity.quantity == 0 {
                    report.add_error(ValidationError::InvalidInstrument {
                        symbol: symbol.to_string(),
                        message: "liquidity quantity must be a positive integer".to_string(),
                    });
                }
            }
            None => report.add_default(&format!("market.instruments.{}.liquidity", symbol), "none"),
        }
    }
}

fn validate_observability(observability: &ObservabilityConfig, report: &mut ValidationReport) {
    if !matches!(
        observability.log_format.to_lowercase().as_str(),
        "pretty" | "json" | "compact"
    ) {
        report.add_error(ValidationError::InvalidLogFormat(observability.log_format.clone()));
    }
    if observability.log_filter.trim().is_empty() {
        report.add_warning(
            "observability.log_filter",
            "empty filter; only RUST_LOG will select events",
        );
    }
    if observability.metrics_port.is_none() {
        report.add_default("observability.metrics_port", "disabled");
    }
}
