//! Workload identity for tether
//!
//! - [`oidc`]: registers the cluster's OIDC issuer with pinned trust anchors
//! - [`trust`]: builds web-identity trust conditions, inline or materialized
//! - [`role`]: planned and imported roles
//! - [`service_account`]: binds a role to a Kubernetes service account
//! - [`roles`]: the packaged cluster roles unit
//! - [`external_secrets`]: the per-cluster external secrets controller

#![deny(missing_docs)]

pub mod external_secrets;
pub mod oidc;
pub mod role;
pub mod roles;
pub mod service_account;
pub mod trust;

pub use external_secrets::{ChartSource, ExternalSecretsProps, KubernetesExternalSecrets};
pub use oidc::{
    issuer_from_arn, OpenIdConnectProvider, OpenIdConnectProviderProps, EKS_OIDC_THUMBPRINTS,
    OIDC_CLIENT_IDS, OIDC_TRUST_ANCHORS_VERSION,
};
pub use role::Role;
pub use roles::ClusterRoles;
pub use service_account::{ClusterIdentity, RoleSource, ServiceAccount, ServiceAccountProps};
pub use trust::{
    service_account_subject, trust_conditions, ConditionValue, JsonMaterialization, TrustBinding,
};
