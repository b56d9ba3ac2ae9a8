//! Plan command
//!
//! Records a deployment request and prints the resulting template.

use std::path::PathBuf;

use clap::Args;
use serde_json::json;
use tracing::info;

use super::OutputFormat;
use crate::request::DeploymentRequest;
use crate::Result;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Deployment request (YAML)
    pub request: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,

    /// Include the operator registry in the output
    #[arg(long)]
    pub show_operators: bool,
}

/// Render the plan for a request file
pub fn render(args: &PlanArgs) -> Result<String> {
    let request = DeploymentRequest::from_file(&args.request)?;
    let deployment = request.build()?;

    let mut document = deployment.stack.to_template()?;
    if args.show_operators {
        let operators: Vec<&str> = deployment.stack.registry().keys().collect();
        document["Operators"] = json!(operators);
    }

    info!(
        request = %args.request.display(),
        resources = deployment.stack.plan().len(),
        "rendered plan"
    );
    args.output.render(&document)
}

/// Run the plan command
pub fn run(args: PlanArgs) -> Result<()> {
    println!("{}", render(&args)?);
    Ok(())
}
