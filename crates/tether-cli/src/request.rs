//! Deployment requests
//!
//! A request describes one cluster, its operators and the service accounts
//! that need workload identities. Building a request records everything into
//! a [`Stack`].

use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tether_cluster::{ClusterResource, ClusterResourceProps, ClusterSpec, CreationRole};
use tether_common::{Deferred, PolicyStatement, Stack};
use tether_iam::{
    ChartSource, ClusterIdentity, ClusterRoles, ExternalSecretsProps, JsonMaterialization,
    KubernetesExternalSecrets, OpenIdConnectProvider, OpenIdConnectProviderProps, RoleSource,
    ServiceAccount, ServiceAccountProps,
};
use tether_provider::{ClusterOperatorConfig, HandlerPlacement, KubectlProvider, KubectlProviderProps};

use crate::{Error, Result};

/// Stack name used when the request does not set one
pub const DEFAULT_STACK_NAME: &str = "Tether";

/// One deployment
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    /// Stack (scope) name
    #[serde(default = "default_stack_name")]
    pub stack: String,

    /// The managed cluster
    pub cluster: ClusterRequest,

    /// Operator selection and placement
    #[serde(default)]
    pub operators: OperatorSettings,

    /// Service accounts bound to roles
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountRequest>,

    /// External secrets controller for the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_secrets: Option<ExternalSecretsRequest>,
}

fn default_stack_name() -> String {
    DEFAULT_STACK_NAME.to_string()
}

/// The managed cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRequest {
    /// Logical id of the cluster resource
    #[serde(default = "default_cluster_id")]
    pub id: String,

    /// Cluster specification
    #[serde(flatten)]
    pub spec: ClusterSpec,

    /// Role the control plane runs as; supplied by the roles unit when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,

    /// Role the operator assumes; supplied by the roles unit when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_role_arn: Option<String>,
}

fn default_cluster_id() -> String {
    "Cluster".to_string()
}

/// Operator selection and placement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSettings {
    /// Packaged cluster operator; the function operator is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_provider_template_url: Option<String>,

    /// Packaged kubectl operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubectl_provider_template_url: Option<String>,

    /// Packaged OIDC operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_provider_template_url: Option<String>,

    /// Packaged JSON utilities operator for trust conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfn_json_provider_template_url: Option<String>,

    /// Packaged cluster roles unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles_template_url: Option<String>,

    /// Subnets operator handlers run in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handler_subnet_ids: Vec<String>,

    /// Security group operator handlers run with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_security_group_id: Option<String>,

    /// Extra environment for the cluster handler
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Extra code layer for the cluster handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

impl OperatorSettings {
    fn placement(&self) -> HandlerPlacement {
        HandlerPlacement::new(
            self.handler_subnet_ids.iter().map(Deferred::from).collect(),
            self.handler_security_group_id.as_ref().map(Deferred::from),
        )
    }
}

/// A service account bound to a role
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRequest {
    /// Construct id
    pub id: String,

    /// Name; derived from the id when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace; "default" when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Import the role from the packaged load balancer controller unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_controller_role_template_url: Option<String>,

    /// Permissions granted to the role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_statements: Vec<PolicyStatement>,
}

/// The external secrets controller
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretsRequest {
    /// Region the controller reads secrets from
    pub region: String,

    /// Namespace; "kube-system" when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Packaged chart archive; the public chart repository when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_asset_url: Option<String>,

    /// Extra chart values
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub values: serde_json::Map<String, serde_json::Value>,

    /// Permissions granted to the controller's role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_statements: Vec<PolicyStatement>,
}

/// Everything a request recorded
#[derive(Debug)]
pub struct Deployment {
    /// The stack holding the plan
    pub stack: Stack,
    /// The submitted cluster
    pub cluster: ClusterResource,
    /// The cluster's issuer registration, when service accounts need one
    pub oidc: Option<OpenIdConnectProvider>,
    /// The packaged roles, when used
    pub roles: Option<ClusterRoles>,
    /// The kubectl operator, when configured
    pub kubectl: Option<KubectlProvider>,
    /// Service accounts, in request order
    pub service_accounts: Vec<ServiceAccount>,
    /// The external secrets controller, when requested
    pub external_secrets: Option<KubernetesExternalSecrets>,
}

impl DeploymentRequest {
    /// Load a request from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse a request from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let request: Self = serde_yaml::from_str(content)?;
        request.validate()?;
        Ok(request)
    }

    /// Check the request before anything is planned
    pub fn validate(&self) -> Result<()> {
        if self.stack.trim().is_empty() {
            return Err(Error::validation("stack name cannot be empty"));
        }
        if self.cluster.id.trim().is_empty() {
            return Err(Error::validation("cluster id cannot be empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for sa in &self.service_accounts {
            if !seen.insert(sa.id.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate service account id '{}'",
                    sa.id
                )));
            }
        }
        Ok(())
    }

    /// Record the deployment into a fresh stack
    pub fn build(&self) -> Result<Deployment> {
        let mut stack = Stack::new(&self.stack);
        let placement = self.operators.placement();
        let cluster_id = self.cluster.id.as_str();

        let roles = match &self.operators.roles_template_url {
            Some(url) => Some(ClusterRoles::packaged(
                &mut stack,
                "EksRoles",
                url,
                self.cluster
                    .spec
                    .secrets_encryption_key_arn
                    .as_ref()
                    .map(Deferred::from),
                self.cluster.spec.removal_policy,
            )?),
            None => None,
        };

        let (role_arn, creation_role) = match &roles {
            Some(roles) => (
                roles.service_role_arn(),
                CreationRole::imported(roles.creation_role_arn()),
            ),
            None => (
                Deferred::from(self.cluster.role_arn.clone().unwrap_or_default()),
                CreationRole::imported(self.cluster.creation_role_arn.clone().unwrap_or_default()),
            ),
        };

        let mut operator = ClusterOperatorConfig::new(creation_role.arn.clone());
        operator.packaged_template_url = self.operators.cluster_provider_template_url.clone();
        operator.placement = placement.clone();
        operator.environment = self.operators.environment.clone();
        operator.layer = self.operators.layer.clone();

        let cluster = ClusterResource::create(
            &mut stack,
            cluster_id,
            &ClusterResourceProps {
                spec: self.cluster.spec.clone(),
                role_arn,
                creation_role: creation_role.clone(),
            },
            &operator,
        )?;

        let kubectl = match &self.operators.kubectl_provider_template_url {
            Some(url) => Some(KubectlProvider::packaged(
                &mut stack,
                &KubectlProviderProps {
                    template_url: url.clone(),
                    cluster_arn: cluster.arn(),
                    creation_role_arn: creation_role.arn.clone(),
                    placement: placement.clone(),
                },
            )?),
            None => None,
        };

        let oidc = if self.service_accounts.is_empty() && self.external_secrets.is_none() {
            None
        } else {
            Some(OpenIdConnectProvider::register(
                &mut stack,
                &format!("{cluster_id}OpenIdConnectProvider"),
                &OpenIdConnectProviderProps {
                    url: cluster.open_id_connect_issuer_url(),
                    template_url: self.operators.oidc_provider_template_url.clone(),
                    placement: placement.clone(),
                },
            )?)
        };

        let mut service_accounts = Vec::with_capacity(self.service_accounts.len());
        let mut external_secrets = None;
        if let Some(oidc) = &oidc {
            let identity = ClusterIdentity {
                cluster_name: cluster.reference(),
                oidc: oidc.clone(),
                placement,
            };
            for sa in &self.service_accounts {
                service_accounts.push(self.build_service_account(&mut stack, &identity, sa)?);
            }
            if let Some(request) = &self.external_secrets {
                external_secrets =
                    Some(self.build_external_secrets(&mut stack, &identity, request)?);
            }
        }

        info!(
            stack = %stack.name(),
            resources = stack.plan().len(),
            operators = stack.registry().len(),
            "deployment planned"
        );
        Ok(Deployment {
            stack,
            cluster,
            oidc,
            roles,
            kubectl,
            service_accounts,
            external_secrets,
        })
    }

    fn synthesized_role_source(&self) -> RoleSource {
        let json = match &self.operators.cfn_json_provider_template_url {
            Some(url) => JsonMaterialization::Proxy {
                provider_template_url: url.clone(),
            },
            None => JsonMaterialization::Native,
        };
        RoleSource::Synthesized { json }
    }

    fn build_external_secrets(
        &self,
        stack: &mut Stack,
        identity: &ClusterIdentity,
        request: &ExternalSecretsRequest,
    ) -> Result<KubernetesExternalSecrets> {
        let mut props = ExternalSecretsProps::new(request.region.as_str());
        props.namespace = request.namespace.clone();
        props.role_source = self.synthesized_role_source();
        props.values = request.values.clone();
        if let Some(url) = &request.chart_asset_url {
            props.chart = ChartSource::Asset { url: url.clone() };
        }

        let mut secrets =
            KubernetesExternalSecrets::create(stack, &self.cluster.id, identity, &props)?;
        for statement in &request.policy_statements {
            secrets.add_to_principal_policy(stack, statement.clone())?;
        }
        Ok(secrets)
    }

    fn build_service_account(
        &self,
        stack: &mut Stack,
        identity: &ClusterIdentity,
        request: &ServiceAccountRequest,
    ) -> Result<ServiceAccount> {
        let role_source = match &request.load_balancer_controller_role_template_url {
            Some(url) => RoleSource::Imported {
                template_url: url.clone(),
            },
            None => self.synthesized_role_source(),
        };
        debug!(service_account = %request.id, source = ?role_source, "building service account");

        let mut sa = ServiceAccount::new(
            stack,
            &request.id,
            identity,
            &ServiceAccountProps {
                name: request.name.clone(),
                namespace: request.namespace.clone(),
                role_source,
            },
        )?;
        for statement in &request.policy_statements {
            sa.add_to_principal_policy(stack, statement.clone())?;
        }
        Ok(sa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
cluster:
  name: prod
  version: "1.21"
  subnetIds: [subnet-a, subnet-b]
  roleArn: arn:aws:iam::123456789012:role/eks-service
  creationRoleArn: arn:aws:iam::123456789012:role/eks-creation
"#;

    #[test]
    fn minimal_request_uses_defaults() {
        let request = DeploymentRequest::from_yaml(MINIMAL).unwrap();
        assert_eq!(request.stack, DEFAULT_STACK_NAME);
        assert_eq!(request.cluster.id, "Cluster");
        assert_eq!(request.cluster.spec.name.as_deref(), Some("prod"));
        assert!(request.cluster.spec.endpoint_public_access);
        assert!(request.service_accounts.is_empty());
    }

    #[test]
    fn minimal_request_plans_cluster_and_function_operator() {
        let deployment = DeploymentRequest::from_yaml(MINIMAL).unwrap().build().unwrap();
        assert!(deployment.stack.plan().resource("Cluster").is_some());
        assert_eq!(deployment.stack.registry().len(), 1);
        assert!(deployment.oidc.is_none());
        assert!(deployment.kubectl.is_none());
        assert!(deployment.roles.is_none());
    }

    #[test]
    fn missing_creation_role_is_a_precondition_failure() {
        let yaml = "cluster:\n  name: prod\n  roleArn: arn:aws:iam::1:role/svc\n";
        let err = DeploymentRequest::from_yaml(yaml).unwrap().build().unwrap_err();
        match err {
            Error::Plan(tether_common::Error::Precondition { input, .. }) => {
                assert_eq!(input, "creationRole")
            }
            other => panic!("expected precondition error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_service_account_ids_are_rejected() {
        let yaml = format!("{MINIMAL}serviceAccounts:\n  - id: Sa\n  - id: Sa\n");
        let err = DeploymentRequest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate service account id"));
    }

    /// Story: with the packaged roles unit, the cluster takes both of its
    /// roles from the unit's outputs
    #[test]
    fn story_roles_unit_supplies_cluster_roles() {
        let yaml = r#"
cluster:
  name: prod
  subnetIds: [subnet-a]
  secretsEncryptionKeyArn: arn:aws:kms:us-east-1:1:key/k
operators:
  rolesTemplateUrl: https://bucket/roles.json
"#;
        let deployment = DeploymentRequest::from_yaml(yaml).unwrap().build().unwrap();
        let roles = deployment.roles.unwrap();
        let submission = deployment.cluster.submission();
        assert_eq!(submission.assume_role_arn, roles.creation_role_arn());
        assert_eq!(submission.config.role_arn, roles.service_role_arn());

        let cluster = deployment.stack.plan().resource("Cluster").unwrap();
        assert!(cluster.depends_on.contains(roles.logical_id()));
    }

    #[test]
    fn roles_unit_without_key_fails() {
        let yaml = "cluster:\n  name: prod\noperators:\n  rolesTemplateUrl: https://bucket/roles.json\n";
        let err = DeploymentRequest::from_yaml(yaml).unwrap().build().unwrap_err();
        assert!(err.to_string().contains("secretsEncryptionKey"));
    }

    /// Story: the external secrets controller alone is enough to register the
    /// issuer, and its chart waits for its account and the issuer
    #[test]
    fn story_external_secrets_installs_on_the_cluster() {
        let yaml = format!(
            "{MINIMAL}externalSecrets:\n  region: us-east-1\n  values:\n    replicaCount: 2\n  policyStatements:\n    - Action: [secretsmanager:GetSecretValue]\n      Resource: ['*']\n"
        );
        let deployment = DeploymentRequest::from_yaml(&yaml).unwrap().build().unwrap();
        assert!(deployment.service_accounts.is_empty());
        let oidc = deployment.oidc.unwrap();
        let secrets = deployment.external_secrets.unwrap();

        assert_eq!(secrets.service_account().namespace(), "kube-system");
        assert_eq!(secrets.values()["replicaCount"], 2);
        assert_eq!(secrets.values()["env"]["AWS_REGION"], "us-east-1");

        let chart = deployment.stack.plan().manifest(secrets.chart_id()).unwrap();
        assert!(chart.depends_on.contains(oidc.logical_id().unwrap()));
        assert!(chart
            .depends_on
            .contains(secrets.service_account().manifest_id()));

        let role_id = secrets.service_account().role().logical_id().unwrap();
        assert!(deployment
            .stack
            .plan()
            .resource(&format!("{role_id}DefaultPolicy"))
            .is_some());
    }

    #[test]
    fn service_account_role_source_follows_configured_units() {
        let yaml = format!(
            "{MINIMAL}operators:\n  cfnJsonProviderTemplateUrl: https://bucket/cfn.json\n  handlerSubnetIds: [subnet-h]\n  handlerSecurityGroupId: sg-h\nserviceAccounts:\n  - id: App\n    name: app\n  - id: Alb\n    name: alb\n    namespace: kube-system\n    loadBalancerControllerRoleTemplateUrl: https://bucket/alb.json\n"
        );
        let deployment = DeploymentRequest::from_yaml(&yaml).unwrap().build().unwrap();
        let [app, alb] = deployment.service_accounts.as_slice() else {
            panic!("expected two service accounts");
        };
        assert!(!app.role().is_imported());
        assert!(matches!(
            app.trust().unwrap().condition(),
            tether_iam::ConditionValue::Materialized { .. }
        ));
        assert!(alb.role().is_imported());
        assert_eq!(alb.namespace(), "kube-system");
    }
}
