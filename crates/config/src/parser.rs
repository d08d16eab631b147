use crate::*;
use anyhow::{Context, Result};
use rust_decimal_macros::dec;
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    parse_config(&content)
}

/// Parse a YAML document after environment variable substitution
pub fn parse_config(content: &str) -> Result<MasterConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: MasterConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(ledger = %config.ledger.name, "Configuration loaded successfully");
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> MasterConfig {
    use defaults::*;

    MasterConfig {
        ledger: LedgerConfig {
            name: "Brokerage Ledger".to_string(),
            description: "Back-office order matching and settlement".to_string(),
            version: "1.0.0".to_string(),
        },
        trading: TradingConfig::default(),
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            postgres: Some(PostgresConfig {
                url: "${DATABASE_URL}".to_string(),
                max_connections: default_max_connections(),
            }),
        },
        scheduler: SchedulerConfig::default(),
        market: MarketConfig {
            instruments: vec![
                InstrumentSeed {
                    symbol: "A17U".to_string(),
                    last_price: dec!(3.28),
                    liquidity: Some(LiquiditySeed {
                        bid: dec!(3.26),
                        ask: dec!(3.30),
                        quantity: 20000,
                    }),
                },
                InstrumentSeed {
                    symbol: "D05".to_string(),
                    last_price: dec!(28.50),
                    liquidity: Some(LiquiditySeed {
                        bid: dec!(28.45),
                        ask: dec!(28.55),
                        quantity: 20000,
                    }),
                },
                InstrumentSeed {
                    symbol: "Z74".to_string(),
                    last_price: dec!(2.35),
                    liquidity: None,
                },
            ],
        },
        observability: ObservabilityConfig {
            log_format: default_log_format(),
            log_filter: default_log_filter(),
            metrics_port: Some(9090),
        },
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_survives_yaml() {
        let config = generate_default_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: MasterConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.ledger.name, config.ledger.name);
        assert_eq!(parsed.market.instruments.len(), 3);
        assert_eq!(parsed.market.instruments[1].last_price, dec!(28.50));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("ledger-config-{}.yaml", std::process::id()));
        let mut config = generate_default_config();
        // Avoid depending on DATABASE_URL being set in the test environment
        config.storage.postgres = None;

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(loaded.trading.session_open, "09:00");
        assert_eq!(loaded.observability.metrics_port, Some(9090));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
