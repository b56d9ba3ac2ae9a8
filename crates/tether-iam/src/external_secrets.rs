//! Kubernetes external secrets controller
//!
//! One installation per cluster: a `kubernetes-external-secrets` service
//! account (with its own role) and a chart release whose values name that
//! account and carry the region. Rendering and applying the chart is left to
//! the manifest-apply collaborator; this module only records what to apply
//! and what it must wait for.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};
use tracing::info;

use tether_common::{Deferred, Error, PlannedManifest, PolicyStatement, Result, Stack};

use crate::service_account::{ClusterIdentity, RoleSource, ServiceAccount, ServiceAccountProps};

/// Namespace the controller runs in unless overridden
pub const EXTERNAL_SECRETS_NAMESPACE: &str = "kube-system";

/// Name of the controller's service account
pub const EXTERNAL_SECRETS_SERVICE_ACCOUNT: &str = "kubernetes-external-secrets";

/// Chart name and release name
pub const EXTERNAL_SECRETS_CHART: &str = "kubernetes-external-secrets";

/// Chart repository
pub const EXTERNAL_SECRETS_REPOSITORY: &str =
    "https://external-secrets.github.io/kubernetes-external-secrets";

/// Pinned chart version
pub const EXTERNAL_SECRETS_CHART_VERSION: &str = "8.5.2";

/// Where the chart comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChartSource {
    /// A chart repository
    Repository {
        /// Repository URL
        repository: String,
        /// Chart name
        chart: String,
        /// Release name
        release: String,
        /// Chart version
        version: String,
    },
    /// A packaged chart archive, by content address
    Asset {
        /// Archive URL
        url: String,
    },
}

impl Default for ChartSource {
    fn default() -> Self {
        ChartSource::Repository {
            repository: EXTERNAL_SECRETS_REPOSITORY.to_string(),
            chart: EXTERNAL_SECRETS_CHART.to_string(),
            release: EXTERNAL_SECRETS_CHART.to_string(),
            version: EXTERNAL_SECRETS_CHART_VERSION.to_string(),
        }
    }
}

/// Installation settings
#[derive(Clone, Debug)]
pub struct ExternalSecretsProps {
    /// Namespace; `kube-system` when unset
    pub namespace: Option<String>,
    /// Existing service account to run as; one is created when unset
    pub service_account: Option<ServiceAccount>,
    /// Role source for a created service account
    pub role_source: RoleSource,
    /// Region handed to the controller as `env.AWS_REGION`
    pub region: Deferred,
    /// Extra chart values
    pub values: Map<String, Value>,
    /// Chart location
    pub chart: ChartSource,
}

impl ExternalSecretsProps {
    /// Defaults for the given region
    pub fn new(region: impl Into<Deferred>) -> Self {
        Self {
            namespace: None,
            service_account: None,
            role_source: RoleSource::default(),
            region: region.into(),
            values: Map::new(),
            chart: ChartSource::default(),
        }
    }
}

/// The controller installed on one cluster
#[derive(Clone, Debug)]
pub struct KubernetesExternalSecrets {
    service_account: ServiceAccount,
    chart_id: String,
    values: Map<String, Value>,
}

impl KubernetesExternalSecrets {
    /// Install the controller on the cluster recorded as `cluster_id`
    ///
    /// A second installation on the same cluster is rejected.
    pub fn create(
        stack: &mut Stack,
        cluster_id: &str,
        cluster: &ClusterIdentity,
        props: &ExternalSecretsProps,
    ) -> Result<Self> {
        let prefix = format!("{}ExternalSecrets", stack.unique_id(cluster_id));
        let chart_id = format!("chart-{prefix}Resource");
        if stack.plan().manifest(&chart_id).is_some() {
            return Err(Error::validation_for(
                cluster_id,
                "external secrets are already installed on this cluster",
            ));
        }

        let namespace = props
            .namespace
            .clone()
            .unwrap_or_else(|| EXTERNAL_SECRETS_NAMESPACE.to_string());
        let account_name = props
            .service_account
            .as_ref()
            .map(|sa| sa.name().to_string())
            .unwrap_or_else(|| EXTERNAL_SECRETS_SERVICE_ACCOUNT.to_string());
        let values = chart_values(&prefix, &props.values, &account_name, &props.region)?;

        let service_account = match &props.service_account {
            Some(existing) => existing.clone(),
            None => ServiceAccount::new(
                stack,
                &format!("{prefix}Sa"),
                cluster,
                &ServiceAccountProps {
                    name: Some(account_name),
                    namespace: Some(namespace.clone()),
                    role_source: props.role_source.clone(),
                },
            )?,
        };

        let mut depends_on: BTreeSet<String> = service_account.role_arn().referenced_ids();
        depends_on.insert(service_account.manifest_id().to_string());
        depends_on.extend(cluster.oidc.arn().referenced_ids());
        if let Some(oidc_id) = cluster.oidc.logical_id() {
            depends_on.insert(oidc_id.to_string());
        }

        stack.plan_mut().add_manifest(
            &chart_id,
            PlannedManifest {
                cluster_name: cluster.cluster_name.clone(),
                manifest: vec![chart_document(&props.chart, &namespace, &values)],
                depends_on,
            },
        )?;

        info!(
            cluster = %cluster_id,
            namespace = %namespace,
            service_account = %service_account.name(),
            "planned external secrets controller"
        );
        Ok(Self {
            service_account,
            chart_id,
            values,
        })
    }

    /// Service account the controller runs as
    pub fn service_account(&self) -> &ServiceAccount {
        &self.service_account
    }

    /// Grant the controller a permission, typically secret reads
    pub fn add_to_principal_policy(
        &mut self,
        stack: &mut Stack,
        statement: PolicyStatement,
    ) -> Result<()> {
        self.service_account.add_to_principal_policy(stack, statement)
    }

    /// Logical id of the chart manifest
    pub fn chart_id(&self) -> &str {
        &self.chart_id
    }

    /// Final chart values
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

fn chart_values(
    prefix: &str,
    extra: &Map<String, Value>,
    account_name: &str,
    region: &Deferred,
) -> Result<Map<String, Value>> {
    let mut values = extra.clone();
    values.insert(
        "serviceAccount".to_string(),
        json!({ "create": false, "name": account_name }),
    );
    match values
        .entry("env")
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(env) => {
            env.insert("AWS_REGION".to_string(), json!(region));
        }
        _ => {
            return Err(Error::validation_for_field(
                prefix,
                "values.env",
                "chart env values must be a mapping",
            ))
        }
    }
    Ok(values)
}

fn chart_document(chart: &ChartSource, namespace: &str, values: &Map<String, Value>) -> Value {
    let mut doc = match chart {
        ChartSource::Repository {
            repository,
            chart,
            release,
            version,
        } => json!({
            "Chart": chart,
            "Repository": repository,
            "Release": release,
            "Version": version,
        }),
        ChartSource::Asset { url } => json!({ "ChartAssetURL": url }),
    };
    doc["Namespace"] = json!(namespace);
    doc["Values"] = Value::Object(values.clone());
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::{OpenIdConnectProvider, OpenIdConnectProviderProps};
    use crate::trust::trust_conditions;
    use tether_provider::HandlerPlacement;

    fn registered(stack: &mut Stack) -> ClusterIdentity {
        let oidc = OpenIdConnectProvider::register(
            stack,
            "ClusterOidc",
            &OpenIdConnectProviderProps::new("https://oidc.example.org/id/ABC"),
        )
        .unwrap();
        ClusterIdentity {
            cluster_name: Deferred::reference("Cluster"),
            oidc,
            placement: HandlerPlacement::default(),
        }
    }

    /// Story: installing the controller creates its service account in
    /// kube-system and a chart that waits for that account and the issuer
    #[test]
    fn story_install_creates_account_and_chart() {
        let mut stack = Stack::new("App");
        let identity = registered(&mut stack);
        let secrets = KubernetesExternalSecrets::create(
            &mut stack,
            "Cluster",
            &identity,
            &ExternalSecretsProps::new("us-east-1"),
        )
        .unwrap();

        let sa = secrets.service_account();
        assert_eq!(sa.name(), EXTERNAL_SECRETS_SERVICE_ACCOUNT);
        assert_eq!(sa.namespace(), EXTERNAL_SECRETS_NAMESPACE);
        assert_eq!(
            sa.trust().unwrap().subject(),
            "system:serviceaccount:kube-system:kubernetes-external-secrets"
        );

        let manifest = stack.plan().manifest(secrets.chart_id()).unwrap();
        assert_eq!(manifest.cluster_name, Deferred::reference("Cluster"));
        assert!(manifest.depends_on.contains(sa.manifest_id()));
        assert!(manifest.depends_on.contains(sa.role().logical_id().unwrap()));
        assert!(manifest.depends_on.contains("ClusterOidc"));

        assert_eq!(
            manifest.manifest[0],
            json!({
                "Chart": "kubernetes-external-secrets",
                "Repository": EXTERNAL_SECRETS_REPOSITORY,
                "Release": "kubernetes-external-secrets",
                "Version": "8.5.2",
                "Namespace": "kube-system",
                "Values": {
                    "serviceAccount": {"create": false, "name": "kubernetes-external-secrets"},
                    "env": {"AWS_REGION": "us-east-1"}
                }
            })
        );
    }

    #[test]
    fn grants_land_on_the_controller_role() {
        let mut stack = Stack::new("App");
        let identity = registered(&mut stack);
        let mut secrets = KubernetesExternalSecrets::create(
            &mut stack,
            "Cluster",
            &identity,
            &ExternalSecretsProps::new("us-east-1"),
        )
        .unwrap();
        secrets
            .add_to_principal_policy(
                &mut stack,
                PolicyStatement::allow(["secretsmanager:GetSecretValue"], ["*"]),
            )
            .unwrap();

        let role_id = secrets.service_account().role().logical_id().unwrap().to_string();
        let policy = stack
            .plan()
            .resource(&format!("{role_id}DefaultPolicy"))
            .unwrap();
        assert_eq!(
            policy.properties["PolicyDocument"]["Statement"][0]["Action"],
            json!(["secretsmanager:GetSecretValue"])
        );
    }

    #[test]
    fn second_install_on_the_same_cluster_is_rejected() {
        let mut stack = Stack::new("App");
        let identity = registered(&mut stack);
        let props = ExternalSecretsProps::new("us-east-1");
        KubernetesExternalSecrets::create(&mut stack, "Cluster", &identity, &props).unwrap();
        let before = stack.plan().len();

        let err = KubernetesExternalSecrets::create(&mut stack, "Cluster", &identity, &props)
            .unwrap_err();
        assert!(err.to_string().contains("already installed"));
        assert_eq!(stack.plan().len(), before);
    }

    #[test]
    fn caller_values_are_kept_and_region_always_set() {
        let mut stack = Stack::new("App");
        let identity = registered(&mut stack);
        let mut props = ExternalSecretsProps::new(Deferred::reference("AWS::Region"));
        props.values.insert("replicaCount".to_string(), json!(2));
        props
            .values
            .insert("env".to_string(), json!({"LOG_LEVEL": "debug", "AWS_REGION": "eu-west-1"}));
        props.values.insert(
            "serviceAccount".to_string(),
            json!({"create": true, "name": "other"}),
        );

        let secrets =
            KubernetesExternalSecrets::create(&mut stack, "Cluster", &identity, &props).unwrap();
        let values = secrets.values();
        assert_eq!(values["replicaCount"], 2);
        assert_eq!(
            values["env"],
            json!({"LOG_LEVEL": "debug", "AWS_REGION": {"Ref": "AWS::Region"}})
        );
        assert_eq!(
            values["serviceAccount"],
            json!({"create": false, "name": "kubernetes-external-secrets"})
        );
    }

    #[test]
    fn non_mapping_env_fails_before_anything_is_recorded() {
        let mut stack = Stack::new("App");
        let identity = registered(&mut stack);
        let before = stack.plan().len();
        let mut props = ExternalSecretsProps::new("us-east-1");
        props.values.insert("env".to_string(), json!(["AWS_REGION"]));

        let err = KubernetesExternalSecrets::create(&mut stack, "Cluster", &identity, &props)
            .unwrap_err();
        assert!(err.to_string().contains("values.env"));
        assert_eq!(stack.plan().len(), before);
        assert_eq!(stack.plan().manifests().count(), 0);
    }

    #[test]
    fn existing_service_account_is_reused() {
        let mut stack = Stack::new("App");
        let identity = registered(&mut stack);
        let existing = ServiceAccount::new(
            &mut stack,
            "Secrets",
            &identity,
            &ServiceAccountProps {
                name: Some("secrets-reader".to_string()),
                namespace: Some("platform".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let mut props = ExternalSecretsProps::new("us-east-1");
        props.namespace = Some("platform".to_string());
        props.service_account = Some(existing);

        let secrets =
            KubernetesExternalSecrets::create(&mut stack, "Cluster", &identity, &props).unwrap();
        assert_eq!(secrets.service_account().name(), "secrets-reader");
        assert_eq!(secrets.values()["serviceAccount"]["name"], "secrets-reader");
        // Only the caller's account and the chart
        assert_eq!(stack.plan().manifests().count(), 2);
    }

    #[test]
    fn chart_asset_replaces_repository_coordinates() {
        let mut stack = Stack::new("App");
        let known = ClusterIdentity {
            cluster_name: Deferred::reference("Cluster"),
            oidc: OpenIdConnectProvider::from_arn(
                "arn:aws:iam::1:oidc-provider/oidc.example.org/id/ABC",
            )
            .unwrap(),
            placement: HandlerPlacement::default(),
        };
        let mut props = ExternalSecretsProps::new("us-east-1");
        props.chart = ChartSource::Asset {
            url: "https://bucket/kes-8.5.2.tgz".to_string(),
        };

        let secrets =
            KubernetesExternalSecrets::create(&mut stack, "Cluster", &known, &props).unwrap();
        let doc = &stack.plan().manifest(secrets.chart_id()).unwrap().manifest[0];
        assert_eq!(doc["ChartAssetURL"], "https://bucket/kes-8.5.2.tgz");
        assert!(doc.get("Chart").is_none());
        assert!(doc.get("Repository").is_none());

        // Known issuer: the trust conditions are inlined
        let role_id = secrets.service_account().role().logical_id().unwrap();
        let role = stack.plan().resource(role_id).unwrap();
        assert_eq!(
            role.properties["AssumeRolePolicyDocument"]["Statement"][0]["Condition"]
                ["StringEquals"],
            json!(trust_conditions(
                "oidc.example.org/id/ABC",
                "kube-system",
                "kubernetes-external-secrets"
            ))
        );
    }
}
