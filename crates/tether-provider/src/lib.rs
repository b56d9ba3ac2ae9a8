//! Operator provisioning for tether
//!
//! An operator is the out-of-process executor for one custom resource kind.
//! This crate records operators into a [`tether_common::Stack`] using one of
//! two backends:
//! - **Function**: an execution role plus an in-region function
//! - **Packaged**: a pre-built nested unit fetched from a content address
//!
//! Either way the caller gets a shared [`tether_common::OperatorHandle`] whose
//! service token is referenced by every resource of that kind in the scope.

#![deny(missing_docs)]

pub mod backend;
pub mod constants;
pub mod function;
pub mod kubectl;
pub mod packaged;
pub mod placement;

pub use backend::{cluster_operator, cluster_operator_backend, ClusterOperatorConfig, OperatorBackend};
pub use constants::*;
pub use function::{provider_id, record_function_operator, FunctionOperatorProps};
pub use kubectl::{KubectlProvider, KubectlProviderProps};
pub use packaged::{
    record_packaged_operator, unit_logical_id, PackagedOperatorProps, PackagedUnit,
    PackagedUnitRef,
};
pub use placement::{HandlerPlacement, PlacementParameters};
