//! Resolve command
//!
//! Re-plans a request, then substitutes the outputs the orchestrator
//! reported. Prints the cluster attributes and the typed service account
//! manifests.

use std::path::PathBuf;

use clap::Args;
use k8s_openapi::api::core::v1::ServiceAccount;
use serde::Serialize;
use tracing::debug;

use tether_cluster::ResolvedClusterAttributes;
use tether_common::ResolvedOutputs;

use super::OutputFormat;
use crate::request::DeploymentRequest;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Deployment request (YAML)
    pub request: PathBuf,

    /// Reported outputs, keyed by logical id (YAML or JSON)
    #[arg(long)]
    pub outputs: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

/// Resolved view of a deployment
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDeployment {
    /// Cluster outputs
    pub cluster: ResolvedClusterAttributes,
    /// Service account manifests
    pub service_accounts: Vec<ServiceAccount>,
}

/// Resolve a request against reported outputs
pub fn resolve(request: &DeploymentRequest, outputs: &ResolvedOutputs) -> Result<ResolvedDeployment> {
    let deployment = request.build()?;
    let cluster = deployment.cluster.resolve(outputs)?;
    let service_accounts = deployment
        .service_accounts
        .iter()
        .map(|sa| sa.resolve(outputs))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(
        cluster = %cluster.name,
        service_accounts = service_accounts.len(),
        "resolved deployment"
    );
    Ok(ResolvedDeployment {
        cluster,
        service_accounts,
    })
}

/// Render the resolved view for a request file
pub fn render(args: &ResolveArgs) -> Result<String> {
    let request = DeploymentRequest::from_file(&args.request)?;
    let content =
        std::fs::read_to_string(&args.outputs).map_err(|e| Error::read_file(&args.outputs, e))?;
    // YAML is a superset of JSON
    let outputs: ResolvedOutputs = serde_yaml::from_str(&content)?;
    args.output.render(&resolve(&request, &outputs)?)
}

/// Run the resolve command
pub fn run(args: ResolveArgs) -> Result<()> {
    println!("{}", render(&args)?);
    Ok(())
}
