//! Deployment scope and plan
//!
//! A [`Stack`] is one deployment scope: it owns the operator registry for that
//! scope and the [`Plan`] of resources and manifests recorded while building
//! it. The plan is engine-neutral: every entry is a logical id, a type, a
//! property document (with deferred values in intrinsic form), explicit
//! dependencies and a removal policy. Rendering, dependency ordering and
//! deployment belong to the external engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Deferred, Error, OperatorHandle, ProviderRegistry, Result};

/// What happens to a remote resource when its scope is torn down
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RemovalPolicy {
    /// The operator deletes the remote resource
    #[default]
    Destroy,
    /// The remote resource is left in place
    Retain,
}

impl RemovalPolicy {
    /// The engine's deletion policy keyword
    pub fn deletion_policy(self) -> &'static str {
        match self {
            RemovalPolicy::Destroy => "Delete",
            RemovalPolicy::Retain => "Retain",
        }
    }
}

/// A resource recorded in the plan
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedResource {
    /// Logical id, unique within the stack
    pub logical_id: String,
    /// Resource type (e.g., "Custom::AWSCDK-EKS-Cluster")
    pub resource_type: String,
    /// Property document
    pub properties: serde_json::Value,
    /// Logical ids that must exist before this resource is submitted
    pub depends_on: BTreeSet<String>,
    /// Teardown behaviour
    pub removal_policy: RemovalPolicy,
}

impl PlannedResource {
    /// Create a resource with no dependencies and the default removal policy
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        properties: serde_json::Value,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties,
            depends_on: BTreeSet::new(),
            removal_policy: RemovalPolicy::default(),
        }
    }

    /// Add an explicit ordering dependency
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    /// Set the removal policy
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    /// Physical id of this resource
    pub fn reference(&self) -> Deferred {
        Deferred::reference(&self.logical_id)
    }

    /// Output attribute of this resource
    pub fn attribute(&self, name: &str) -> Deferred {
        Deferred::attribute(&self.logical_id, name)
    }

    fn to_template(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "Type": self.resource_type,
            "Properties": self.properties,
            "DeletionPolicy": self.removal_policy.deletion_policy(),
        });
        if !self.depends_on.is_empty() {
            body["DependsOn"] = serde_json::json!(self.depends_on);
        }
        body
    }
}

/// A Kubernetes manifest handed to the external manifest-apply collaborator
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PlannedManifest {
    /// Cluster the manifest is applied to
    pub cluster_name: Deferred,
    /// Manifest documents (deferred values in intrinsic form)
    pub manifest: Vec<serde_json::Value>,
    /// Logical ids that must exist before the manifest is applied
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

/// Resources and manifests recorded for one stack
#[derive(Clone, Debug, Default)]
pub struct Plan {
    resources: BTreeMap<String, PlannedResource>,
    manifests: BTreeMap<String, PlannedManifest>,
}

impl Plan {
    /// Record a resource
    ///
    /// Logical ids are unique within a stack; recording the same id twice is
    /// a validation error and leaves the plan unchanged.
    pub fn add_resource(&mut self, resource: PlannedResource) -> Result<Deferred> {
        if self.resources.contains_key(&resource.logical_id)
            || self.manifests.contains_key(&resource.logical_id)
        {
            return Err(Error::validation_for(
                &resource.logical_id,
                "a resource with this logical id already exists in the stack",
            ));
        }
        debug!(
            logical_id = %resource.logical_id,
            resource_type = %resource.resource_type,
            "recorded resource"
        );
        let reference = resource.reference();
        self.resources
            .insert(resource.logical_id.clone(), resource);
        Ok(reference)
    }

    /// Record a manifest for the external manifest-apply collaborator
    pub fn add_manifest(
        &mut self,
        logical_id: impl Into<String>,
        manifest: PlannedManifest,
    ) -> Result<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) || self.manifests.contains_key(&logical_id) {
            return Err(Error::validation_for(
                &logical_id,
                "a manifest with this logical id already exists in the stack",
            ));
        }
        debug!(logical_id = %logical_id, "recorded manifest");
        self.manifests.insert(logical_id, manifest);
        Ok(())
    }

    /// Add an ordering dependency between two recorded entries
    pub fn add_dependency(&mut self, logical_id: &str, on: impl Into<String>) -> Result<()> {
        let on = on.into();
        if let Some(resource) = self.resources.get_mut(logical_id) {
            resource.depends_on.insert(on);
            return Ok(());
        }
        if let Some(manifest) = self.manifests.get_mut(logical_id) {
            manifest.depends_on.insert(on);
            return Ok(());
        }
        Err(Error::validation_for(logical_id, "no such resource in the stack"))
    }

    /// Look up a recorded resource
    pub fn resource(&self, logical_id: &str) -> Option<&PlannedResource> {
        self.resources.get(logical_id)
    }

    /// Look up a recorded resource for in-place property changes
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut PlannedResource> {
        self.resources.get_mut(logical_id)
    }

    /// Look up a recorded manifest
    pub fn manifest(&self, logical_id: &str) -> Option<&PlannedManifest> {
        self.manifests.get(logical_id)
    }

    /// Recorded resources in logical-id order
    pub fn resources(&self) -> impl Iterator<Item = &PlannedResource> {
        self.resources.values()
    }

    /// Recorded resources of one type
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a PlannedResource> + 'a {
        self.resources
            .values()
            .filter(move |r| r.resource_type == resource_type)
    }

    /// Recorded manifests in logical-id order
    pub fn manifests(&self) -> impl Iterator<Item = (&str, &PlannedManifest)> {
        self.manifests.iter().map(|(id, m)| (id.as_str(), m))
    }

    /// Number of recorded resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.manifests.is_empty()
    }
}

/// One deployment scope
#[derive(Debug)]
pub struct Stack {
    name: String,
    plan: Plan,
    registry: ProviderRegistry,
}

impl Stack {
    /// Create an empty stack
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plan: Plan::default(),
            registry: ProviderRegistry::new(),
        }
    }

    /// Stack name, used as the registry scope
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recorded plan
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Recorded plan, for adding entries
    pub fn plan_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }

    /// Operator registry for this scope
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Return this scope's operator of `kind`, building it on first use
    ///
    /// `build` receives the plan so it can record the operator's resources;
    /// it runs at most once per kind.
    pub fn operator_or_create<F>(
        &mut self,
        kind: &str,
        config: serde_json::Value,
        build: F,
    ) -> Result<Arc<OperatorHandle>>
    where
        F: FnOnce(&mut Plan) -> Result<OperatorHandle>,
    {
        let plan = &mut self.plan;
        self.registry
            .get_or_create(&self.name, kind, config, || build(plan))
    }

    /// Stable unique id for a construct path within this stack
    ///
    /// Alphanumeric path components concatenated, followed by an 8-character
    /// digest of the full path so that distinct paths never collide.
    pub fn unique_id(&self, path: &str) -> String {
        let full = format!("{}/{}", self.name, path);
        let human: String = full
            .split('/')
            .flat_map(|component| component.chars().filter(char::is_ascii_alphanumeric))
            .collect();
        let digest = Sha256::digest(full.as_bytes());
        let suffix: String = digest[..4].iter().map(|b| format!("{b:02X}")).collect();
        format!("{human}{suffix}")
    }

    /// Render the plan as an engine-neutral template document
    pub fn to_template(&self) -> Result<serde_json::Value> {
        let resources: serde_json::Map<String, serde_json::Value> = self
            .plan
            .resources()
            .map(|r| (r.logical_id.clone(), r.to_template()))
            .collect();
        let manifests = self
            .plan
            .manifests()
            .map(|(id, m)| -> Result<(String, serde_json::Value)> {
                Ok((id.to_string(), serde_json::to_value(m)?))
            })
            .collect::<Result<serde_json::Map<String, serde_json::Value>>>()?;

        let mut template = serde_json::json!({ "Resources": resources });
        if !manifests.is_empty() {
            template["Manifests"] = serde_json::Value::Object(manifests);
        }
        Ok(template)
    }
}
