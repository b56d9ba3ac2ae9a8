//! Managed cluster resource for tether
//!
//! Two halves of the same resource:
//! - [`resource`]: the plan side, which submits a cluster to the scope's
//!   operator and exposes its outputs as deferred values
//! - [`handler`]: the operator side, which turns lifecycle events into
//!   control plane calls
//!
//! [`spec`] holds the payload both halves agree on, including the
//! attributes revision that forces an output refresh.

#![deny(missing_docs)]

pub mod handler;
pub mod resource;
pub mod spec;

pub use handler::{
    analyze_update, ApiError, ClusterApi, ClusterDescription, ClusterHandler, ClusterStatus,
    IsCompleteResponse, LifecycleEvent, OnEventResponse, RequestType, UpdateAction,
};
pub use resource::{
    ClusterResource, ClusterResourceProps, CreationRole, ResolvedClusterAttributes,
    CLUSTER_ATTRIBUTES,
};
pub use spec::{
    AttributesRevision, ClusterConfig, ClusterSpec, ResourcesVpcConfig, Submission,
    SubmissionChange, ATTRIBUTES_REVISION,
};
