//! Common types for Tether: errors, deferred values, the deployment stack and
//! the per-scope operator registry

#![deny(missing_docs)]

pub mod deferred;
pub mod error;
pub mod operator;
pub mod policy;
pub mod registry;
pub mod stack;
pub mod telemetry;

pub use deferred::{Deferred, ResolvedOutputs, ResourceOutputs};
pub use error::Error;
pub use operator::{OperatorBackendKind, OperatorHandle};
pub use policy::{Effect, PolicyDocument, PolicyStatement, Principal, TrustStatement};
pub use registry::ProviderRegistry;
pub use stack::{Plan, PlannedManifest, PlannedResource, RemovalPolicy, Stack};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Separator used when a list parameter is passed to a packaged unit
pub const LIST_PARAMETER_SEPARATOR: &str = ",";
