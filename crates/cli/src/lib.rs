use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "brokerd")]
#[command(about = "Brokerage ledger - order matching, settlement and session lifecycle")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ledger daemon and run the session scheduler until Ctrl-C
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/ledger.yaml", env = "BROKERD_CONFIG")]
        config: PathBuf,

        /// Run an admission batch right away, overriding the config
        #[arg(long)]
        admit_now: bool,
    },

    /// Validate configuration without starting the daemon
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/ledger.yaml", env = "BROKERD_CONFIG")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "ledger.yaml")]
        output: PathBuf,
    },

    /// Run one lifecycle batch now and exit
    Batch {
        /// Which batch to run
        #[arg(value_enum)]
        batch: BatchArg,

        /// Path to the configuration file
        #[arg(short, long, default_value = "config/ledger.yaml", env = "BROKERD_CONFIG")]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchArg {
    /// Match the backlog of unprocessed orders
    Admission,

    /// Expire every live customer order
    Expiry,
}

impl BatchArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchArg::Admission => "admission",
            BatchArg::Expiry => "expiry",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
