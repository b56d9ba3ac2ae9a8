//! Tether CLI library

pub mod commands;
pub mod error;
pub mod request;

pub use error::{Error, Result};

use clap::{Parser, Subcommand, ValueEnum};
use tether_common::telemetry::{LogFormat, TelemetryConfig};

/// Tether - plan EKS clusters and their workload identities
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t, env = "TETHER_LOG_FORMAT")]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a deployment request and print the plan
    Plan(commands::plan::PlanArgs),
    /// Resolve a planned deployment against reported outputs
    Resolve(commands::resolve::ResolveArgs),
    /// Print the JSON schema of a deployment request
    Schema(commands::schema::SchemaArgs),
}

impl Cli {
    /// Logging configuration for this invocation
    pub fn telemetry(&self) -> TelemetryConfig {
        let format = match self.log_format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        };
        TelemetryConfig {
            format,
            ..Default::default()
        }
    }

    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Plan(args) => commands::plan::run(args),
            Commands::Resolve(args) => commands::resolve::run(args),
            Commands::Schema(args) => commands::schema::run(args),
        }
    }
}
