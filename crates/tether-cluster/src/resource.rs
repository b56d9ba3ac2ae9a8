//! Cluster resource proxy
//!
//! Records the cluster as a custom resource served by the scope's cluster
//! operator and exposes its outputs as deferred values. Nothing here waits
//! for the remote cluster: [`ClusterResource::resolve`] reads the outputs the
//! orchestration phase reported.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use tether_common::{
    Deferred, Error, OperatorHandle, PlannedResource, RemovalPolicy, ResolvedOutputs, Result,
    Stack,
};
use tether_provider::{cluster_operator, ClusterOperatorConfig, CLUSTER_RESOURCE_TYPE};

use crate::spec::{ClusterSpec, Submission};

/// Output attribute: API server endpoint
pub const ATTR_ENDPOINT: &str = "Endpoint";
/// Output attribute: cluster ARN
pub const ATTR_ARN: &str = "Arn";
/// Output attribute: base64 certificate authority data
pub const ATTR_CERTIFICATE_AUTHORITY_DATA: &str = "CertificateAuthorityData";
/// Output attribute: security group created for the cluster
pub const ATTR_CLUSTER_SECURITY_GROUP_ID: &str = "ClusterSecurityGroupId";
/// Output attribute: secrets encryption key ARN
pub const ATTR_ENCRYPTION_CONFIG_KEY_ARN: &str = "EncryptionConfigKeyArn";
/// Output attribute: OIDC issuer URL
pub const ATTR_OPENID_CONNECT_ISSUER_URL: &str = "OpenIdConnectIssuerUrl";
/// Output attribute: OIDC issuer without scheme
pub const ATTR_OPENID_CONNECT_ISSUER: &str = "OpenIdConnectIssuer";

/// Every attribute the cluster operator reports at the current revision
pub const CLUSTER_ATTRIBUTES: [&str; 7] = [
    ATTR_ENDPOINT,
    ATTR_ARN,
    ATTR_CERTIFICATE_AUTHORITY_DATA,
    ATTR_CLUSTER_SECURITY_GROUP_ID,
    ATTR_ENCRYPTION_CONFIG_KEY_ARN,
    ATTR_OPENID_CONNECT_ISSUER_URL,
    ATTR_OPENID_CONNECT_ISSUER,
];

/// Role the operator assumes to create the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct CreationRole {
    /// Role ARN
    pub arn: Deferred,
    /// Logical id of the role when it is planned in the same stack
    pub logical_id: Option<String>,
}

impl CreationRole {
    /// A role planned in the same stack; the cluster is ordered after it
    pub fn planned(logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        Self {
            arn: Deferred::attribute(&logical_id, "Arn"),
            logical_id: Some(logical_id),
        }
    }

    /// A role that already exists, or one supplied by another unit
    pub fn imported(arn: impl Into<Deferred>) -> Self {
        Self {
            arn: arn.into(),
            logical_id: None,
        }
    }
}

/// Inputs to a cluster submission
#[derive(Clone, Debug)]
pub struct ClusterResourceProps {
    /// Cluster specification
    pub spec: ClusterSpec,
    /// Role the control plane runs as
    pub role_arn: Deferred,
    /// Role the operator assumes
    pub creation_role: CreationRole,
}

/// Resolved cluster outputs
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedClusterAttributes {
    /// Physical cluster name
    pub name: String,
    /// API server endpoint
    pub endpoint: String,
    /// Cluster ARN
    pub arn: String,
    /// Certificate authority data
    pub certificate_authority_data: String,
    /// Cluster security group
    pub cluster_security_group_id: String,
    /// Secrets encryption key ARN (empty when not encrypted)
    pub encryption_config_key_arn: String,
    /// OIDC issuer URL
    pub open_id_connect_issuer_url: String,
    /// OIDC issuer
    pub open_id_connect_issuer: String,
}

/// A submitted cluster
#[derive(Clone, Debug)]
pub struct ClusterResource {
    logical_id: String,
    operator: Arc<OperatorHandle>,
    submission: Submission<Deferred>,
    removal_policy: RemovalPolicy,
}

fn check_creation_role(id: &str, props: &ClusterResourceProps) -> Result<()> {
    if props.creation_role.arn.is_empty_literal() {
        return Err(Error::precondition(
            "creationRole",
            "clusterCreationRole",
            format!("cluster '{id}' needs a role for the operator to assume"),
        ));
    }
    if props.role_arn.is_empty_literal() {
        return Err(Error::validation_for_field(id, "roleArn", "roleArn is required"));
    }
    Ok(())
}

impl ClusterResource {
    /// Record the cluster against an existing operator
    pub fn submit(
        stack: &mut Stack,
        id: &str,
        props: &ClusterResourceProps,
        operator: Arc<OperatorHandle>,
    ) -> Result<Self> {
        check_creation_role(id, props)?;

        let submission = Submission::new(
            props.spec.to_config(props.role_arn.clone()),
            props.creation_role.arn.clone(),
        );
        let removal_policy = props.spec.removal_policy;

        let mut properties = serde_json::to_value(&submission)?;
        properties["ServiceToken"] = json!(operator.service_token());

        let mut resource = PlannedResource::new(id, CLUSTER_RESOURCE_TYPE, properties)
            .with_removal_policy(removal_policy);
        // Always ordered after whatever produces the creation role
        if let Some(role_id) = &props.creation_role.logical_id {
            resource = resource.depends_on(role_id);
        }
        for producer in props.creation_role.arn.referenced_ids() {
            resource = resource.depends_on(producer);
        }
        stack.plan_mut().add_resource(resource)?;

        info!(
            cluster = %id,
            revision = %submission.attributes_revision,
            packaged = operator.is_packaged(),
            "submitted cluster"
        );

        Ok(Self {
            logical_id: id.to_string(),
            operator,
            submission,
            removal_policy,
        })
    }

    /// Select the scope's cluster operator, then submit
    ///
    /// The creation role is checked first so a bad request leaves the plan
    /// untouched.
    pub fn create(
        stack: &mut Stack,
        id: &str,
        props: &ClusterResourceProps,
        operator: &ClusterOperatorConfig,
    ) -> Result<Self> {
        check_creation_role(id, props)?;
        let mut operator = operator.clone();
        operator.creation_role_arn = props.creation_role.arn.clone();
        let handle = cluster_operator(stack, &operator)?;
        Self::submit(stack, id, props, handle)
    }

    /// Logical id of the cluster resource
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Physical cluster name
    pub fn reference(&self) -> Deferred {
        Deferred::reference(&self.logical_id)
    }

    /// Operator serving this cluster
    pub fn operator(&self) -> &Arc<OperatorHandle> {
        &self.operator
    }

    /// Submitted payload
    pub fn submission(&self) -> &Submission<Deferred> {
        &self.submission
    }

    /// Teardown behaviour
    pub fn removal_policy(&self) -> RemovalPolicy {
        self.removal_policy
    }

    /// A named output attribute
    pub fn attribute(&self, name: &str) -> Deferred {
        Deferred::attribute(&self.logical_id, name)
    }

    /// API server endpoint
    pub fn endpoint(&self) -> Deferred {
        self.attribute(ATTR_ENDPOINT)
    }

    /// Cluster ARN
    pub fn arn(&self) -> Deferred {
        self.attribute(ATTR_ARN)
    }

    /// Certificate authority data
    pub fn certificate_authority_data(&self) -> Deferred {
        self.attribute(ATTR_CERTIFICATE_AUTHORITY_DATA)
    }

    /// Cluster security group
    pub fn cluster_security_group_id(&self) -> Deferred {
        self.attribute(ATTR_CLUSTER_SECURITY_GROUP_ID)
    }

    /// Secrets encryption key ARN
    pub fn encryption_config_key_arn(&self) -> Deferred {
        self.attribute(ATTR_ENCRYPTION_CONFIG_KEY_ARN)
    }

    /// OIDC issuer URL
    pub fn open_id_connect_issuer_url(&self) -> Deferred {
        self.attribute(ATTR_OPENID_CONNECT_ISSUER_URL)
    }

    /// OIDC issuer
    pub fn open_id_connect_issuer(&self) -> Deferred {
        self.attribute(ATTR_OPENID_CONNECT_ISSUER)
    }

    /// Read every output; fails on the first one the orchestrator did not report
    pub fn resolve(&self, outputs: &ResolvedOutputs) -> Result<ResolvedClusterAttributes> {
        Ok(ResolvedClusterAttributes {
            name: self.reference().resolve(outputs)?,
            endpoint: self.endpoint().resolve(outputs)?,
            arn: self.arn().resolve(outputs)?,
            certificate_authority_data: self.certificate_authority_data().resolve(outputs)?,
            cluster_security_group_id: self.cluster_security_group_id().resolve(outputs)?,
            encryption_config_key_arn: self.encryption_config_key_arn().resolve(outputs)?,
            open_id_connect_issuer_url: self.open_id_connect_issuer_url().resolve(outputs)?,
            open_id_connect_issuer: self.open_id_connect_issuer().resolve(outputs)?,
        })
    }
}
