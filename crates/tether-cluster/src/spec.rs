//! Cluster specification and submission payload
//!
//! [`ClusterSpec`] is what callers write. [`ClusterConfig`] is what the
//! operator hands to the remote create-cluster call unchanged, so its field
//! names mirror that request. A [`Submission`] wraps the config with the role
//! the operator assumes and the [`AttributesRevision`].

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use tether_common::{Error, RemovalPolicy, Result};

/// Current attributes revision
///
/// Bump whenever a new output attribute is added to the cluster resource.
/// Resubmitting with a higher revision forces the engine to re-read the
/// operator's outputs without touching the remote cluster. Never decrease or
/// reuse a value.
pub const ATTRIBUTES_REVISION: u32 = 2;

/// Resources encrypted with the secrets encryption key
pub const SECRETS_RESOURCE: &str = "secrets";

/// Caller-facing cluster specification
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name; generated by the operator when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Kubernetes version (e.g., "1.21")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Subnets for the control plane network interfaces
    #[serde(default)]
    pub subnet_ids: Vec<String>,

    /// Extra security groups for the control plane network interfaces
    #[serde(default)]
    pub security_group_ids: Vec<String>,

    /// Whether the API endpoint is reachable from the internet
    #[serde(default = "default_true")]
    pub endpoint_public_access: bool,

    /// Whether the API endpoint is reachable from inside the network
    #[serde(default)]
    pub endpoint_private_access: bool,

    /// CIDRs allowed to reach the public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_access_cidrs: Option<Vec<String>>,

    /// Key used to envelope-encrypt Kubernetes secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_encryption_key_arn: Option<String>,

    /// CIDR block Kubernetes service addresses are assigned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ipv4_cidr: Option<String>,

    /// What happens to the cluster when the scope is torn down
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

fn default_true() -> bool {
    true
}

impl ClusterSpec {
    /// Build the remote create-cluster payload with the given cluster role
    pub fn to_config<R>(&self, role_arn: R) -> ClusterConfig<R> {
        ClusterConfig {
            name: self.name.clone(),
            version: self.version.clone(),
            role_arn,
            encryption_config: self.secrets_encryption_key_arn.as_ref().map(|key_arn| {
                vec![EncryptionConfig {
                    provider: EncryptionProvider {
                        key_arn: key_arn.clone(),
                    },
                    resources: vec![SECRETS_RESOURCE.to_string()],
                }]
            }),
            kubernetes_network_config: self.service_ipv4_cidr.as_ref().map(|cidr| {
                KubernetesNetworkConfig {
                    service_ipv4_cidr: Some(cidr.clone()),
                }
            }),
            resources_vpc_config: ResourcesVpcConfig {
                subnet_ids: self.subnet_ids.clone(),
                security_group_ids: self.security_group_ids.clone(),
                endpoint_public_access: self.endpoint_public_access,
                endpoint_private_access: self.endpoint_private_access,
                public_access_cidrs: self.public_access_cidrs.clone(),
            },
        }
    }
}

/// Remote create-cluster request
///
/// `R` is the type of role references: [`tether_common::Deferred`] while
/// planning, `String` once the engine has resolved them for the operator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig<R = String> {
    /// Cluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kubernetes version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Role the control plane runs as
    pub role_arn: R,
    /// Envelope encryption settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_config: Option<Vec<EncryptionConfig>>,
    /// Service networking settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_network_config: Option<KubernetesNetworkConfig>,
    /// Network placement and endpoint access
    pub resources_vpc_config: ResourcesVpcConfig,
}

/// One envelope encryption entry
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    /// Key provider
    pub provider: EncryptionProvider,
    /// Encrypted resource kinds
    pub resources: Vec<String>,
}

/// Encryption key provider
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionProvider {
    /// Key ARN
    pub key_arn: String,
}

/// Kubernetes service networking
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesNetworkConfig {
    /// Service address range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ipv4_cidr: Option<String>,
}

/// Network placement and endpoint access of the control plane
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesVpcConfig {
    /// Subnets
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Security groups
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Public endpoint enabled
    #[serde(deserialize_with = "bool_or_string")]
    pub endpoint_public_access: bool,
    /// Private endpoint enabled
    #[serde(deserialize_with = "bool_or_string")]
    pub endpoint_private_access: bool,
    /// CIDRs allowed to reach the public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_access_cidrs: Option<Vec<String>>,
}

impl ResourcesVpcConfig {
    /// Whether only endpoint access settings differ from `other`
    pub fn same_placement(&self, other: &Self) -> bool {
        self.subnet_ids == other.subnet_ids && self.security_group_ids == other.security_group_ids
    }
}

// Same stringification as the attributes revision: accept "true" as well as true.
fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => Ok(b),
        Raw::Text(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(serde::de::Error::custom(format!("invalid boolean '{s}'"))),
        },
    }
}

/// Strictly increasing revision of the output attribute set
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AttributesRevision(u32);

impl AttributesRevision {
    /// The revision this build emits
    pub const CURRENT: AttributesRevision = AttributesRevision(ATTRIBUTES_REVISION);

    /// A specific revision
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Numeric value
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for AttributesRevision {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for AttributesRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The engine stringifies scalar properties before handing them to the
// operator, so accept "2" as well as 2.
impl<'de> Deserialize<'de> for AttributesRevision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map(Self)
                .map_err(|_| serde::de::Error::custom(format!("invalid attributes revision '{s}'"))),
        }
    }
}

/// Properties submitted to the cluster operator
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Submission<R = String> {
    /// Remote create-cluster request
    pub config: ClusterConfig<R>,
    /// Role the operator assumes for remote calls
    pub assume_role_arn: R,
    /// Output attribute set revision
    #[serde(default)]
    pub attributes_revision: AttributesRevision,
}

/// How a resubmission relates to the previous one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionChange {
    /// Identical submission; nothing to do
    Unchanged,
    /// The cluster spec or assumed role changed
    Changed,
    /// Only the revision increased; re-read outputs without remote calls
    AttributeRefresh,
}

impl<R: PartialEq> Submission<R> {
    /// A submission at the current revision
    pub fn new(config: ClusterConfig<R>, assume_role_arn: R) -> Self {
        Self {
            config,
            assume_role_arn,
            attributes_revision: AttributesRevision::CURRENT,
        }
    }

    /// Classify this submission against the one it replaces
    pub fn diff(&self, previous: &Submission<R>) -> Result<SubmissionChange> {
        if self.attributes_revision < previous.attributes_revision {
            return Err(Error::revision(
                self.config.name.as_deref().unwrap_or("cluster"),
                previous.attributes_revision.get(),
                self.attributes_revision.get(),
            ));
        }
        if self.config != previous.config || self.assume_role_arn != previous.assume_role_arn {
            return Ok(SubmissionChange::Changed);
        }
        if self.attributes_revision > previous.attributes_revision {
            return Ok(SubmissionChange::AttributeRefresh);
        }
        Ok(SubmissionChange::Unchanged)
    }
}
