//! Cluster operator event handler
//!
//! Runs inside the operator. The orchestrator delivers one lifecycle event at
//! a time: `on_event` starts the remote work and returns at once, then
//! `is_complete` is polled until the cluster settles. Remote calls go through
//! [`ClusterApi`] so tests can mock the control plane.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use tether_common::{Error, Result};

use crate::resource::{
    ATTR_ARN, ATTR_CERTIFICATE_AUTHORITY_DATA, ATTR_CLUSTER_SECURITY_GROUP_ID, ATTR_ENDPOINT,
    ATTR_ENCRYPTION_CONFIG_KEY_ARN, ATTR_OPENID_CONNECT_ISSUER, ATTR_OPENID_CONNECT_ISSUER_URL,
};
use crate::spec::{ClusterConfig, ResourcesVpcConfig, Submission, SubmissionChange};

/// Longest cluster name the control plane accepts
pub const MAX_CLUSTER_NAME_LEN: usize = 100;

/// Errors reported by the control plane SDK
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum ApiError {
    /// The cluster does not exist
    #[error("resource not found: {0}")]
    NotFound(String),
    /// The request was throttled or hit a transient fault
    #[error("transient failure: {0}")]
    Transient(String),
    /// Any other failure
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    fn into_error(self, operation: &str) -> Error {
        match self {
            ApiError::Transient(msg) => Error::remote(operation, msg),
            other => Error::remote_permanent(operation, other.to_string()),
        }
    }
}

/// Lifecycle state of a remote cluster
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    /// Being created
    Creating,
    /// Ready
    Active,
    /// Being deleted
    Deleting,
    /// Creation or update failed
    Failed,
    /// Being updated
    Updating,
    /// Waiting to start
    Pending,
}

/// What the control plane reports about a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterDescription {
    /// Cluster name
    pub name: String,
    /// Cluster ARN
    pub arn: String,
    /// Lifecycle state
    pub status: Option<ClusterStatus>,
    /// API server endpoint
    pub endpoint: Option<String>,
    /// Certificate authority data
    pub certificate_authority_data: Option<String>,
    /// Security group created for the cluster
    pub cluster_security_group_id: Option<String>,
    /// Secrets encryption key ARN
    pub encryption_key_arn: Option<String>,
    /// OIDC issuer URL
    pub oidc_issuer_url: Option<String>,
}

/// Control plane SDK boundary
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Start creating a cluster
    async fn create_cluster(&self, config: &ClusterConfig) -> std::result::Result<(), ApiError>;

    /// Describe a cluster by name
    async fn describe_cluster(&self, name: &str)
        -> std::result::Result<ClusterDescription, ApiError>;

    /// Start a Kubernetes version upgrade
    async fn update_cluster_version(
        &self,
        name: &str,
        version: &str,
    ) -> std::result::Result<(), ApiError>;

    /// Start an endpoint access update
    async fn update_cluster_config(
        &self,
        name: &str,
        vpc: &ResourcesVpcConfig,
    ) -> std::result::Result<(), ApiError>;

    /// Start deleting a cluster
    async fn delete_cluster(&self, name: &str) -> std::result::Result<(), ApiError>;
}

/// Event kind
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RequestType {
    /// Resource added to the plan
    Create,
    /// Resource properties changed
    Update,
    /// Resource removed from the plan
    Delete,
}

/// A lifecycle event delivered by the orchestrator
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    /// Event kind
    pub request_type: RequestType,
    /// Orchestrator request id
    pub request_id: String,
    /// Logical id of the cluster resource
    pub logical_resource_id: String,
    /// Physical id; absent on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    /// Submitted properties
    pub resource_properties: Submission,
    /// Previous properties; present on update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Submission>,
}

/// Result of `on_event`
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct OnEventResponse {
    /// Physical id of the (possibly new) cluster
    pub physical_resource_id: String,
}

/// Result of `is_complete`
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct IsCompleteResponse {
    /// Whether the remote work has settled
    pub is_complete: bool,
    /// Output attributes, once complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
}

impl IsCompleteResponse {
    fn pending() -> Self {
        Self::default()
    }

    fn done(data: Option<BTreeMap<String, String>>) -> Self {
        Self {
            is_complete: true,
            data,
        }
    }
}

/// What an update does to the remote cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    /// Nothing remote changes
    None,
    /// Create a new cluster; the orchestrator deletes the old one
    Replace,
    /// Upgrade the Kubernetes version
    Version(String),
    /// Change endpoint access
    EndpointAccess(ResourcesVpcConfig),
}

/// Decide how to move the remote cluster from `old` to `new`
pub fn analyze_update(old: &Submission, new: &Submission) -> Result<UpdateAction> {
    if new.diff(old)? != SubmissionChange::Changed {
        return Ok(UpdateAction::None);
    }

    let (o, n) = (&old.config, &new.config);
    let replace = o.name != n.name
        || o.role_arn != n.role_arn
        || !n.resources_vpc_config.same_placement(&o.resources_vpc_config)
        || o.encryption_config != n.encryption_config
        || o.kubernetes_network_config != n.kubernetes_network_config;
    if replace {
        return Ok(UpdateAction::Replace);
    }

    let version_changed = o.version != n.version;
    let access_changed = o.resources_vpc_config != n.resources_vpc_config;
    match (version_changed, access_changed) {
        (true, true) => Err(Error::validation_for(
            n.name.as_deref().unwrap_or("cluster"),
            "only one of a version update or an endpoint access update can be applied at a time",
        )),
        (true, false) => match &n.version {
            Some(version) => Ok(UpdateAction::Version(version.clone())),
            None => Ok(UpdateAction::None),
        },
        (false, true) => Ok(UpdateAction::EndpointAccess(n.resources_vpc_config.clone())),
        // Only the assumed role changed; the next call uses it
        (false, false) => Ok(UpdateAction::None),
    }
}

/// Physical name for a cluster created without an explicit one
pub fn generate_cluster_name(logical_id: &str, request_id: &str) -> String {
    let suffix: String = request_id.chars().filter(|c| *c != '-').collect();
    let max_prefix = MAX_CLUSTER_NAME_LEN.saturating_sub(suffix.len() + 1);
    let prefix: String = logical_id.chars().take(max_prefix).collect();
    format!("{prefix}-{suffix}")
}

/// Dispatches lifecycle events to the control plane
pub struct ClusterHandler {
    api: Arc<dyn ClusterApi>,
}

impl ClusterHandler {
    /// Create a handler over the given SDK
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Start the remote work for an event
    pub async fn on_event(&self, event: &LifecycleEvent) -> Result<OnEventResponse> {
        debug!(
            request = ?event.request_type,
            logical_id = %event.logical_resource_id,
            "cluster event"
        );
        match event.request_type {
            RequestType::Create => self.create(event).await,
            RequestType::Update => self.update(event).await,
            RequestType::Delete => self.delete(event).await,
        }
    }

    /// Poll whether the remote work for an event has settled
    pub async fn is_complete(&self, event: &LifecycleEvent) -> Result<IsCompleteResponse> {
        let name = physical_id(event)?;
        if event.request_type == RequestType::Delete {
            return match self.api.describe_cluster(name).await {
                Err(ApiError::NotFound(_)) => {
                    info!(cluster = %name, "cluster deleted");
                    Ok(IsCompleteResponse::done(None))
                }
                Err(e) => Err(e.into_error("describeCluster")),
                Ok(_) => Ok(IsCompleteResponse::pending()),
            };
        }

        let cluster = self
            .api
            .describe_cluster(name)
            .await
            .map_err(|e| e.into_error("describeCluster"))?;
        match cluster.status {
            Some(ClusterStatus::Active) => {
                info!(cluster = %name, "cluster active");
                Ok(IsCompleteResponse::done(Some(attributes(&cluster))))
            }
            Some(ClusterStatus::Failed) => Err(Error::remote_permanent(
                "describeCluster",
                format!("cluster '{name}' is in FAILED state"),
            )),
            Some(ClusterStatus::Deleting) => Err(Error::remote_permanent(
                "describeCluster",
                format!("cluster '{name}' is being deleted"),
            )),
            status => {
                debug!(cluster = %name, status = ?status, "cluster not ready");
                Ok(IsCompleteResponse::pending())
            }
        }
    }

    async fn create(&self, event: &LifecycleEvent) -> Result<OnEventResponse> {
        let name = self.create_from(event, &event.resource_properties.config).await?;
        Ok(OnEventResponse {
            physical_resource_id: name,
        })
    }

    async fn create_from(&self, event: &LifecycleEvent, config: &ClusterConfig) -> Result<String> {
        let name = config.name.clone().unwrap_or_else(|| {
            generate_cluster_name(&event.logical_resource_id, &event.request_id)
        });
        let mut config = config.clone();
        config.name = Some(name.clone());

        self.api
            .create_cluster(&config)
            .await
            .map_err(|e| e.into_error("createCluster"))?;
        info!(cluster = %name, "cluster creation started");
        Ok(name)
    }

    async fn update(&self, event: &LifecycleEvent) -> Result<OnEventResponse> {
        let name = physical_id(event)?.to_string();
        let old = event.old_resource_properties.as_ref().ok_or_else(|| {
            Error::validation_for(&event.logical_resource_id, "update event without old properties")
        })?;
        let new = &event.resource_properties;

        match analyze_update(old, new)? {
            UpdateAction::Replace => {
                // An explicit name that did not change would collide with the
                // cluster being replaced
                if new.config.name.is_some() && new.config.name == old.config.name {
                    return Err(Error::validation_for_field(
                        &event.logical_resource_id,
                        "name",
                        "cannot replace a cluster with an explicit physical name; change or remove the name",
                    ));
                }
                let mut config = new.config.clone();
                if config.name.is_none() {
                    config.name = Some(generate_cluster_name(
                        &event.logical_resource_id,
                        &event.request_id,
                    ));
                }
                let replacement = self.create_from(event, &config).await?;
                info!(old = %name, new = %replacement, "cluster replacement started");
                Ok(OnEventResponse {
                    physical_resource_id: replacement,
                })
            }
            UpdateAction::Version(version) => {
                self.api
                    .update_cluster_version(&name, &version)
                    .await
                    .map_err(|e| e.into_error("updateClusterVersion"))?;
                info!(cluster = %name, version = %version, "version update started");
                Ok(OnEventResponse {
                    physical_resource_id: name,
                })
            }
            UpdateAction::EndpointAccess(vpc) => {
                self.api
                    .update_cluster_config(&name, &vpc)
                    .await
                    .map_err(|e| e.into_error("updateClusterConfig"))?;
                info!(cluster = %name, "endpoint access update started");
                Ok(OnEventResponse {
                    physical_resource_id: name,
                })
            }
            UpdateAction::None => {
                debug!(cluster = %name, "no remote change; outputs will be re-read");
                Ok(OnEventResponse {
                    physical_resource_id: name,
                })
            }
        }
    }

    async fn delete(&self, event: &LifecycleEvent) -> Result<OnEventResponse> {
        let name = physical_id(event)?.to_string();
        match self.api.delete_cluster(&name).await {
            Ok(()) => info!(cluster = %name, "cluster deletion started"),
            Err(ApiError::NotFound(_)) => {
                warn!(cluster = %name, "cluster already gone");
            }
            Err(e) => return Err(e.into_error("deleteCluster")),
        }
        Ok(OnEventResponse {
            physical_resource_id: name,
        })
    }
}

fn physical_id(event: &LifecycleEvent) -> Result<&str> {
    event.physical_resource_id.as_deref().ok_or_else(|| {
        Error::validation_for(
            &event.logical_resource_id,
            format!("{:?} event without a physical id", event.request_type),
        )
    })
}

fn attributes(cluster: &ClusterDescription) -> BTreeMap<String, String> {
    let issuer_url = cluster.oidc_issuer_url.clone().unwrap_or_default();
    let issuer = issuer_url
        .strip_prefix("https://")
        .unwrap_or(&issuer_url)
        .to_string();
    BTreeMap::from([
        (ATTR_ENDPOINT.to_string(), cluster.endpoint.clone().unwrap_or_default()),
        (ATTR_ARN.to_string(), cluster.arn.clone()),
        (
            ATTR_CERTIFICATE_AUTHORITY_DATA.to_string(),
            cluster.certificate_authority_data.clone().unwrap_or_default(),
        ),
        (
            ATTR_CLUSTER_SECURITY_GROUP_ID.to_string(),
            cluster.cluster_security_group_id.clone().unwrap_or_default(),
        ),
        (
            ATTR_ENCRYPTION_CONFIG_KEY_ARN.to_string(),
            cluster.encryption_key_arn.clone().unwrap_or_default(),
        ),
        (ATTR_OPENID_CONNECT_ISSUER_URL.to_string(), issuer_url),
        (ATTR_OPENID_CONNECT_ISSUER.to_string(), issuer),
    ])
}
