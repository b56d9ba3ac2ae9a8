//! Packaged operator backend
//!
//! A packaged unit is a pre-built nested deployment unit fetched from a
//! content address. Its outputs are read through fixed names, so the only
//! plan-time work is recording the unit and wiring its parameters.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use tether_common::{
    Deferred, Error, OperatorBackendKind, OperatorHandle, Plan, PlannedResource, RemovalPolicy,
    Result,
};

use crate::constants::{NESTED_UNIT_RESOURCE_TYPE, PARAM_SECURITY_GROUP_IDS, PARAM_SUBNET_IDS};
use crate::placement::HandlerPlacement;

/// Logical id of a nested unit recorded under `id`
pub fn unit_logical_id(id: &str) -> String {
    format!("{id}.NestedStack/{id}.NestedStackResource")
}

/// A nested deployment unit to record
#[derive(Clone, Debug, PartialEq)]
pub struct PackagedUnit {
    id: String,
    template_url: String,
    parameters: BTreeMap<String, Deferred>,
    removal_policy: RemovalPolicy,
}

impl PackagedUnit {
    /// A unit fetched from `template_url`
    pub fn new(id: impl Into<String>, template_url: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let template_url = template_url.into();
        if template_url.trim().is_empty() {
            return Err(Error::validation_for_field(
                &id,
                "templateUrl",
                "packaged unit requires a template address",
            ));
        }
        Ok(Self {
            id,
            template_url,
            parameters: BTreeMap::new(),
            removal_policy: RemovalPolicy::default(),
        })
    }

    /// Pass a parameter to the unit
    pub fn with_parameter(mut self, name: impl Into<String>, value: Deferred) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Set the unit's removal policy
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    /// Template address
    pub fn template_url(&self) -> &str {
        &self.template_url
    }

    /// Record the unit in the plan
    pub fn record(self, plan: &mut Plan) -> Result<PackagedUnitRef> {
        let logical_id = unit_logical_id(&self.id);
        let mut properties = json!({ "TemplateURL": self.template_url });
        if !self.parameters.is_empty() {
            properties["Parameters"] = serde_json::to_value(&self.parameters)?;
        }

        let mut resource = PlannedResource::new(&logical_id, NESTED_UNIT_RESOURCE_TYPE, properties)
            .with_removal_policy(self.removal_policy);
        for value in self.parameters.values() {
            for dependency in value.referenced_ids() {
                resource = resource.depends_on(dependency);
            }
        }
        plan.add_resource(resource)?;

        debug!(unit = %self.id, template_url = %self.template_url, "recorded packaged unit");
        Ok(PackagedUnitRef {
            id: self.id,
            logical_id,
        })
    }
}

/// A recorded nested unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackagedUnitRef {
    id: String,
    logical_id: String,
}

impl PackagedUnitRef {
    /// Id the unit was recorded under
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Logical id of the nested unit resource
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Deferred reference to one of the unit's outputs
    pub fn output(&self, name: &str) -> Deferred {
        Deferred::attribute(&self.logical_id, format!("Outputs.{name}"))
    }
}

/// Settings for a packaged operator
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackagedOperatorProps {
    /// Id the unit is recorded under
    pub unit_id: String,
    /// Content address of the unit's template
    pub template_url: String,
    /// Unit output holding the service token
    pub token_output: String,
    /// Extra unit parameters
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Deferred>,
    /// Network placement; required when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<HandlerPlacement>,
}

impl PackagedOperatorProps {
    /// A packaged operator whose service token is `token_output`
    pub fn new(
        unit_id: impl Into<String>,
        template_url: impl Into<String>,
        token_output: impl Into<String>,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            template_url: template_url.into(),
            token_output: token_output.into(),
            parameters: BTreeMap::new(),
            placement: None,
        }
    }

    /// Pass a parameter to the unit
    pub fn with_parameter(mut self, name: impl Into<String>, value: Deferred) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Run the unit's handlers in the given placement
    pub fn with_placement(mut self, placement: HandlerPlacement) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Check the placement precondition without touching the plan
    pub fn validate(&self) -> Result<()> {
        if let Some(placement) = &self.placement {
            placement.require()?;
        }
        Ok(())
    }
}

/// Record the packaged operator's unit and return its handle
pub fn record_packaged_operator(
    plan: &mut Plan,
    kind: &str,
    props: &PackagedOperatorProps,
) -> Result<OperatorHandle> {
    let mut unit = PackagedUnit::new(&props.unit_id, &props.template_url)?;
    for (name, value) in &props.parameters {
        unit = unit.with_parameter(name, value.clone());
    }
    if let Some(placement) = &props.placement {
        let params = placement.require()?;
        unit = unit
            .with_parameter(PARAM_SUBNET_IDS, params.subnet_ids)
            .with_parameter(PARAM_SECURITY_GROUP_IDS, params.security_group_ids);
    }
    let unit = unit.record(plan)?;

    Ok(OperatorHandle::new(
        kind,
        unit.output(&props.token_output),
        OperatorBackendKind::Packaged {
            unit_id: unit.logical_id().to_string(),
            template_url: props.template_url.clone(),
        },
    ))
}
