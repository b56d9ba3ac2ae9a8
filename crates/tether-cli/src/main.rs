//! Tether CLI
//!
//! Plans EKS clusters, their operators and service account identities.

use clap::Parser;

use tether_cli::{Cli, Result};
use tether_common::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(cli.telemetry())?;
    cli.run()
}
