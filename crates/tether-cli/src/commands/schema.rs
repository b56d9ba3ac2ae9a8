//! Schema command

use clap::Args;

use super::OutputFormat;
use crate::request::DeploymentRequest;
use crate::Result;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

/// Render the JSON schema of a deployment request
pub fn render(args: &SchemaArgs) -> Result<String> {
    args.output.render(&schemars::schema_for!(DeploymentRequest))
}

/// Run the schema command
pub fn run(args: SchemaArgs) -> Result<()> {
    println!("{}", render(&args)?);
    Ok(())
}
