//! Tracing subscriber setup for brokerd
//!
//! `RUST_LOG` always wins over the configured filter.

use std::str::FromStr;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format of the log lines, from `observability.log_format`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
    Compact,
}

impl LogFormat {
    pub const NAMES: [&'static str; 3] = ["pretty", "json", "compact"];
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            f if f.eq_ignore_ascii_case("pretty") => Ok(Self::Pretty),
            f if f.eq_ignore_ascii_case("json") => Ok(Self::Json),
            f if f.eq_ignore_ascii_case("compact") => Ok(Self::Compact),
            other => Err(format!(
                "unknown log format '{}', expected one of {}",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Who is logging and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub service: String,
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset
    pub filter: String,
}

impl LogSettings {
    pub fn new(service: impl Into<String>, format: LogFormat, filter: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            format,
            filter: filter.into(),
        }
    }

    /// Settings for one-shot commands that run before any config is read
    pub fn interactive(service: impl Into<String>) -> Self {
        Self::new(service, LogFormat::Pretty, "info")
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter)
                .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", self.filter, e)),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LogSettings) -> anyhow::Result<()> {
    let filter = settings.env_filter()?;

    let (pretty, json, compact) = match settings.format {
        LogFormat::Pretty => (Some(fmt::layer().with_target(true).with_line_number(true)), None, None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(true)), None),
        LogFormat::Compact => (None, None, Some(fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .try_init()?;

    tracing::info!(
        service = %settings.service,
        format = ?settings.format,
        filter = %settings.filter,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!(" JSON ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));

        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("xml"));
        assert!(err.contains("pretty, json, compact"));
    }

    #[test]
    fn test_configured_filter_is_validated() {
        let settings = LogSettings::new("brokerd", LogFormat::Json, "matching_engine=debug,info");
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(settings.env_filter().is_ok());
            let broken = LogSettings::new("brokerd", LogFormat::Json, "info,[=");
            assert!(broken.env_filter().is_err());
        }
        assert_eq!(LogSettings::interactive("brokerd").filter, "info");
    }
}
