//! IAM policy documents
//!
//! Shared by operator execution roles and workload identity roles.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Deferred;

/// IAM policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement effect
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Effect {
    /// Grant the listed actions
    #[default]
    Allow,
    /// Deny the listed actions
    Deny,
}

/// A principal a trust statement admits
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// An AWS service (e.g., "lambda.amazonaws.com")
    Service(String),
    /// A federated identity provider, by ARN
    Federated(Deferred),
}

impl Serialize for Principal {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Principal::Service(service) => map.serialize_entry("Service", service)?,
            Principal::Federated(arn) => map.serialize_entry("Federated", arn)?,
        }
        map.end()
    }
}

/// A single permission statement
///
/// Resources are plain strings here; statements are written by callers who
/// already know their resource ARNs.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Allow or deny
    #[serde(default)]
    pub effect: Effect,
    /// Actions (e.g., "s3:GetObject")
    pub action: Vec<String>,
    /// Resource ARNs; "*" for all
    pub resource: Vec<String>,
}

impl PolicyStatement {
    /// An allow statement over the given actions and resources
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().map(Into::into).collect(),
        }
    }
}

/// A trust (assume-role) statement
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrustStatement {
    /// Allow or deny
    pub effect: Effect,
    /// Who may assume the role
    pub principal: Principal,
    /// The assume action (e.g., "sts:AssumeRole")
    pub action: String,
    /// Condition operator -> condition map (value may be deferred)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, serde_json::Value>,
}

impl TrustStatement {
    /// A service principal allowed to `sts:AssumeRole`
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: Principal::Service(service.into()),
            action: "sts:AssumeRole".to_string(),
            condition: BTreeMap::new(),
        }
    }
}

/// A versioned policy document
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument<T> {
    /// Policy language version
    pub version: &'static str,
    /// Statements
    pub statement: Vec<T>,
}

impl<T> PolicyDocument<T> {
    /// A document holding the given statements
    pub fn new(statement: Vec<T>) -> Self {
        Self {
            version: POLICY_VERSION,
            statement,
        }
    }
}
