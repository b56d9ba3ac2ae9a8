//! Workload identity: a role bound to a Kubernetes service account
//!
//! The role is either imported from a packaged unit or planned here with a
//! trust binding to the cluster's issuer. Either way a `v1/ServiceAccount`
//! manifest annotated with the role ARN is recorded for the manifest-apply
//! collaborator.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::ServiceAccount as KubeServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use tether_common::{
    Deferred, Error, PlannedManifest, PolicyStatement, ResolvedOutputs, Result, Stack,
};
use tether_provider::{
    HandlerPlacement, PackagedUnit, PARAM_SECURITY_GROUP_IDS, PARAM_SUBNET_IDS,
};

use crate::oidc::OpenIdConnectProvider;
use crate::role::Role;
use crate::trust::{JsonMaterialization, TrustBinding};

/// Annotation naming the role a service account's pods assume
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Label carrying the service account name
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Unit parameter carrying the issuer's provider ARN
pub const PARAM_OPENID_CONNECT_PROVIDER: &str = "OpenIdConnectProvider";

/// Output of the packaged load balancer controller role unit
pub const ALB_CONTROLLER_ROLE_OUTPUT: &str = "EKSAlbControllerRoleArn";

/// Where a service account's role comes from
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum RoleSource {
    /// A packaged unit creates the role; it cannot be modified here
    #[serde(rename_all = "camelCase")]
    Imported {
        /// Content address of the role unit
        template_url: String,
    },
    /// A role planned here, trusting the cluster's issuer
    Synthesized {
        /// How the trust conditions are materialized
        json: JsonMaterialization,
    },
}

impl Default for RoleSource {
    fn default() -> Self {
        RoleSource::Synthesized {
            json: JsonMaterialization::Native,
        }
    }
}

/// What a service account needs to know about its cluster
#[derive(Clone, Debug)]
pub struct ClusterIdentity {
    /// Cluster the manifest is applied to
    pub cluster_name: Deferred,
    /// The cluster's registered issuer
    pub oidc: OpenIdConnectProvider,
    /// Handler placement for packaged units
    pub placement: HandlerPlacement,
}

/// Inputs to a service account
#[derive(Clone, Debug, Default)]
pub struct ServiceAccountProps {
    /// Name; defaults to the lower-cased unique id of the construct path
    pub name: Option<String>,
    /// Namespace; defaults to "default"
    pub namespace: Option<String>,
    /// Role source
    pub role_source: RoleSource,
}

/// A service account bound to a role
#[derive(Clone, Debug)]
pub struct ServiceAccount {
    name: String,
    namespace: String,
    role: Role,
    trust: Option<TrustBinding>,
    manifest_id: String,
}

/// Kubernetes object names: lower-case alphanumerics, '-' and '.', at most 253
fn validate_name(id: &str, field: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 253
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            id,
            field,
            format!("'{value}' is not a valid Kubernetes object name"),
        ))
    }
}

impl ServiceAccount {
    /// Plan the role and record the service account manifest
    pub fn new(
        stack: &mut Stack,
        id: &str,
        cluster: &ClusterIdentity,
        props: &ServiceAccountProps,
    ) -> Result<Self> {
        let name = props
            .name
            .clone()
            .unwrap_or_else(|| stack.unique_id(id).to_lowercase());
        let namespace = props
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        validate_name(id, "name", &name)?;
        validate_name(id, "namespace", &namespace)?;

        let (role, trust) = match &props.role_source {
            RoleSource::Imported { template_url } => {
                let placement = cluster.placement.require()?;
                let unit = PackagedUnit::new(
                    format!("{id}LoadBalancerControllerRoleProvider"),
                    template_url,
                )?
                .with_parameter(PARAM_OPENID_CONNECT_PROVIDER, cluster.oidc.arn().clone())
                .with_parameter(PARAM_SUBNET_IDS, placement.subnet_ids)
                .with_parameter(PARAM_SECURITY_GROUP_IDS, placement.security_group_ids)
                .record(stack.plan_mut())?;
                (Role::from_arn(unit.output(ALB_CONTROLLER_ROLE_OUTPUT)), None)
            }
            RoleSource::Synthesized { json } => {
                let binding =
                    TrustBinding::synthesize(stack, id, &cluster.oidc, &namespace, &name, json)?;
                let role = Role::create(stack, &format!("{id}Role"), vec![binding.statement()])?;
                if let crate::trust::ConditionValue::Materialized { logical_id, .. } =
                    binding.condition()
                {
                    if let Some(role_id) = role.logical_id() {
                        stack.plan_mut().add_dependency(role_id, logical_id.as_str())?;
                    }
                }
                (role, Some(binding))
            }
        };

        let manifest_id = format!("manifest-{id}ServiceAccountResource");
        let document = manifest_document(&name, &namespace, role.arn());
        let depends_on: BTreeSet<String> = role.arn().referenced_ids();
        stack.plan_mut().add_manifest(
            &manifest_id,
            PlannedManifest {
                cluster_name: cluster.cluster_name.clone(),
                manifest: vec![document],
                depends_on,
            },
        )?;

        info!(
            service_account = %name,
            namespace = %namespace,
            imported_role = role.is_imported(),
            "planned service account"
        );
        Ok(Self {
            name,
            namespace,
            role,
            trust,
            manifest_id,
        })
    }

    /// Service account name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service account namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The bound role
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// The bound role's ARN
    pub fn role_arn(&self) -> &Deferred {
        self.role.arn()
    }

    /// Trust binding, for synthesized roles
    pub fn trust(&self) -> Option<&TrustBinding> {
        self.trust.as_ref()
    }

    /// Logical id of the recorded manifest
    pub fn manifest_id(&self) -> &str {
        &self.manifest_id
    }

    /// Grant a permission to the service account's role
    pub fn add_to_principal_policy(
        &mut self,
        stack: &mut Stack,
        statement: PolicyStatement,
    ) -> Result<()> {
        if self.role.is_imported() {
            return Err(Error::capability(
                "addToPrincipalPolicy",
                "the load balancer controller role is imported from a packaged unit",
            ));
        }
        self.role.add_to_principal_policy(stack, statement)
    }

    /// The typed manifest once the role ARN is known
    pub fn resolve(&self, outputs: &ResolvedOutputs) -> Result<KubeServiceAccount> {
        let role_arn = self.role.arn().resolve(outputs)?;
        Ok(KubeServiceAccount {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(NAME_LABEL.to_string(), self.name.clone())])),
                annotations: Some(BTreeMap::from([(
                    ROLE_ARN_ANNOTATION.to_string(),
                    role_arn,
                )])),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

fn manifest_document(name: &str, namespace: &str, role_arn: &Deferred) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { NAME_LABEL: name },
            "annotations": { ROLE_ARN_ANNOTATION: role_arn },
        },
    })
}
