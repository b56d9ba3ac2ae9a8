//! Packaged cluster roles
//!
//! A pre-built unit that creates the cluster's creation, masters, service and
//! pod-execution roles. The unit encrypts secrets with a caller-supplied key,
//! so the key is mandatory.

use tracing::info;

use tether_common::{Deferred, Error, RemovalPolicy, Result, Stack};
use tether_provider::{PackagedUnit, PackagedUnitRef};

/// Unit parameter carrying the secrets encryption key
pub const PARAM_SECRET_KEY_ARN: &str = "SecretKeyArn";

/// Output: role the cluster operator assumes
pub const CLUSTER_CREATION_ROLE_OUTPUT: &str = "EKSClusterCreationRoleArn";
/// Output: role mapped to cluster administrators
pub const MASTERS_ROLE_OUTPUT: &str = "EKSMastersRoleArn";
/// Output: role the control plane runs as
pub const SERVICE_ROLE_OUTPUT: &str = "EKSServiceRoleArn";
/// Output: role serverless pods run as
pub const POD_EXECUTION_ROLE_OUTPUT: &str = "EKSPodExecutionRoleArn";

/// Roles supplied by the packaged roles unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRoles {
    unit: PackagedUnitRef,
}

impl ClusterRoles {
    /// Record the packaged roles unit
    pub fn packaged(
        stack: &mut Stack,
        id: &str,
        template_url: &str,
        secrets_key_arn: Option<Deferred>,
        removal_policy: RemovalPolicy,
    ) -> Result<Self> {
        let key = secrets_key_arn
            .filter(|key| !key.is_empty_literal())
            .ok_or_else(|| {
                Error::precondition(
                    "encryptionKey",
                    "secretsEncryptionKey",
                    "the packaged roles unit encrypts secrets with a caller-supplied key",
                )
            })?;

        let unit = PackagedUnit::new(id, template_url)?
            .with_parameter(PARAM_SECRET_KEY_ARN, key)
            .with_removal_policy(removal_policy)
            .record(stack.plan_mut())?;
        info!(unit = %unit.logical_id(), "recorded packaged cluster roles");
        Ok(Self { unit })
    }

    /// Logical id of the nested unit
    pub fn logical_id(&self) -> &str {
        self.unit.logical_id()
    }

    /// Role the cluster operator assumes
    pub fn creation_role_arn(&self) -> Deferred {
        self.unit.output(CLUSTER_CREATION_ROLE_OUTPUT)
    }

    /// Role mapped to cluster administrators
    pub fn masters_role_arn(&self) -> Deferred {
        self.unit.output(MASTERS_ROLE_OUTPUT)
    }

    /// Role the control plane runs as
    pub fn service_role_arn(&self) -> Deferred {
        self.unit.output(SERVICE_ROLE_OUTPUT)
    }

    /// Role serverless pods run as
    pub fn pod_execution_role_arn(&self) -> Deferred {
        self.unit.output(POD_EXECUTION_ROLE_OUTPUT)
    }
}
