//! Operator backend selection
//!
//! Both backends yield an [`OperatorHandle`]; callers pick one and ask the
//! stack for it. Packaged placement is checked before the registry lookup so
//! a misconfigured caller fails even when another caller already registered
//! the operator.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use tether_common::{Deferred, OperatorHandle, PolicyStatement, Result, Stack};

use crate::constants::{
    CLUSTER_PROVIDER_OUTPUT, CLUSTER_RESOURCE_TYPE, PARAM_CLUSTER_CREATION_ROLE_ARN,
};
use crate::function::{record_function_operator, FunctionOperatorProps};
use crate::packaged::{record_packaged_operator, PackagedOperatorProps};
use crate::placement::HandlerPlacement;

/// How an operator is deployed
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "backend", content = "props", rename_all = "camelCase")]
pub enum OperatorBackend {
    /// In-region function
    Function(FunctionOperatorProps),
    /// Pre-built nested unit
    Packaged(PackagedOperatorProps),
}

impl OperatorBackend {
    /// Backend name for logging
    pub fn name(&self) -> &'static str {
        match self {
            OperatorBackend::Function(_) => "function",
            OperatorBackend::Packaged(_) => "packaged",
        }
    }

    /// Return the stack's operator of `kind`, deploying it on first use
    pub fn provision(&self, stack: &mut Stack, kind: &str) -> Result<Arc<OperatorHandle>> {
        if let OperatorBackend::Packaged(props) = self {
            props.validate()?;
        }
        let config = serde_json::to_value(self)?;
        debug!(kind = %kind, backend = self.name(), "provisioning operator");

        stack.operator_or_create(kind, config, |plan| match self {
            OperatorBackend::Function(props) => record_function_operator(plan, kind, props),
            OperatorBackend::Packaged(props) => record_packaged_operator(plan, kind, props),
        })
    }
}

/// Inputs to the cluster operator selection
#[derive(Clone, Debug)]
pub struct ClusterOperatorConfig {
    /// Content address of the packaged cluster operator, when one is used
    pub packaged_template_url: Option<String>,
    /// Role the operator assumes to create the cluster
    pub creation_role_arn: Deferred,
    /// Handler network placement
    pub placement: HandlerPlacement,
    /// Extra handler environment
    pub environment: BTreeMap<String, String>,
    /// Extra handler code layer
    pub layer: Option<String>,
}

impl ClusterOperatorConfig {
    /// Function-backed operator assuming `creation_role_arn`, not placed
    pub fn new(creation_role_arn: Deferred) -> Self {
        Self {
            packaged_template_url: None,
            creation_role_arn,
            placement: HandlerPlacement::default(),
            environment: BTreeMap::new(),
            layer: None,
        }
    }
}

/// Actions the cluster handler needs beyond assuming the creation role
pub const CLUSTER_HANDLER_ACTIONS: &[&str] = &[
    "eks:CreateCluster",
    "eks:DescribeCluster",
    "eks:DescribeUpdate",
    "eks:DeleteCluster",
    "eks:UpdateClusterVersion",
    "eks:UpdateClusterConfig",
    "eks:CreateFargateProfile",
    "eks:TagResource",
    "eks:UntagResource",
];

/// Unit id of the packaged cluster operator
pub const CLUSTER_PROVIDER_UNIT_ID: &str = "ClusterResourceProvider";

/// Select the backend for the cluster resource kind
///
/// A packaged address selects the packaged unit, which also requires handler
/// placement. Without one the in-region function backend is used.
pub fn cluster_operator_backend(config: &ClusterOperatorConfig) -> OperatorBackend {
    match &config.packaged_template_url {
        Some(url) => OperatorBackend::Packaged(
            PackagedOperatorProps::new(CLUSTER_PROVIDER_UNIT_ID, url, CLUSTER_PROVIDER_OUTPUT)
                .with_parameter(
                    PARAM_CLUSTER_CREATION_ROLE_ARN,
                    config.creation_role_arn.clone(),
                )
                .with_placement(config.placement.clone()),
        ),
        None => {
            let mut props = FunctionOperatorProps::new("index.onEvent")
                .with_statement(PolicyStatement::allow(
                    CLUSTER_HANDLER_ACTIONS.iter().copied(),
                    ["*"],
                ))
                .with_handler_role(config.creation_role_arn.clone())
                .with_placement(config.placement.clone());
            for (key, value) in &config.environment {
                props = props.with_env(key, value);
            }
            if let Some(layer) = &config.layer {
                props = props.with_layer(layer);
            }
            OperatorBackend::Function(props)
        }
    }
}

/// Return the stack's cluster operator, deploying it on first use
pub fn cluster_operator(stack: &mut Stack, config: &ClusterOperatorConfig) -> Result<Arc<OperatorHandle>> {
    let backend = cluster_operator_backend(config);
    let handle = backend.provision(stack, CLUSTER_RESOURCE_TYPE)?;
    info!(
        scope = %stack.name(),
        backend = backend.name(),
        "cluster operator ready"
    );
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::provider_id;
    use crate::packaged::unit_logical_id;
    use tether_common::Error;

    fn placed() -> HandlerPlacement {
        HandlerPlacement::new(
            vec![Deferred::literal("subnet-a")],
            Some(Deferred::literal("sg-1")),
        )
    }

    /// Story: every cluster in a scope shares one operator, regardless of how
    /// many clusters ask for it
    #[test]
    fn story_cluster_operator_is_shared_within_a_scope() {
        let mut stack = Stack::new("App");
        let config = ClusterOperatorConfig::new(Deferred::attribute("CreationRole", "Arn"));

        let first = cluster_operator(&mut stack, &config).unwrap();
        let second = cluster_operator(&mut stack, &config).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stack.registry().len(), 1);
        assert_eq!(
            stack
                .plan()
                .resources_of_type("AWS::Lambda::Function")
                .count(),
            1
        );
        assert_eq!(
            first.service_token(),
            &Deferred::attribute(format!("{}Handler", provider_id(CLUSTER_RESOURCE_TYPE)), "Arn")
        );
    }

    #[test]
    fn separate_scopes_get_separate_operators() {
        let config = ClusterOperatorConfig::new(Deferred::literal("arn:aws:iam::1:role/c"));
        let mut a = Stack::new("A");
        let mut b = Stack::new("B");
        let ha = cluster_operator(&mut a, &config).unwrap();
        let hb = cluster_operator(&mut b, &config).unwrap();
        assert!(!Arc::ptr_eq(&ha, &hb));
    }

    #[test]
    fn packaged_address_selects_packaged_backend() {
        let mut config = ClusterOperatorConfig::new(Deferred::attribute("CreationRole", "Arn"));
        config.packaged_template_url = Some("https://bucket/cluster.json".to_string());
        config.placement = placed();

        let mut stack = Stack::new("App");
        let handle = cluster_operator(&mut stack, &config).unwrap();

        assert!(handle.is_packaged());
        let unit_id = unit_logical_id(CLUSTER_PROVIDER_UNIT_ID);
        assert_eq!(
            handle.service_token(),
            &Deferred::attribute(&unit_id, format!("Outputs.{CLUSTER_PROVIDER_OUTPUT}"))
        );
        let unit = stack.plan().resource(&unit_id).unwrap();
        assert_eq!(
            unit.properties["Parameters"][PARAM_CLUSTER_CREATION_ROLE_ARN],
            serde_json::json!({"Fn::GetAtt": ["CreationRole", "Arn"]})
        );
        assert!(unit.depends_on.contains("CreationRole"));
    }

    #[test]
    fn packaged_backend_without_placement_is_a_precondition_failure() {
        let mut config = ClusterOperatorConfig::new(Deferred::literal("arn:aws:iam::1:role/c"));
        config.packaged_template_url = Some("https://bucket/cluster.json".to_string());

        let mut stack = Stack::new("App");
        let err = cluster_operator(&mut stack, &config).unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
        assert!(stack.plan().is_empty());
        assert!(stack.registry().is_empty());
    }

    #[test]
    fn placement_is_checked_even_when_operator_already_exists() {
        let mut stack = Stack::new("App");
        let mut good = ClusterOperatorConfig::new(Deferred::literal("arn:aws:iam::1:role/c"));
        good.packaged_template_url = Some("https://bucket/cluster.json".to_string());
        good.placement = placed();
        cluster_operator(&mut stack, &good).unwrap();

        let mut bad = good.clone();
        bad.placement.security_group_id = None;
        assert!(cluster_operator(&mut stack, &bad).is_err());
    }

    #[test]
    fn function_backend_carries_environment_and_layer() {
        let mut config = ClusterOperatorConfig::new(Deferred::literal("arn:aws:iam::1:role/c"));
        config
            .environment
            .insert("HTTPS_PROXY".to_string(), "http://proxy:3128".to_string());
        config.layer = Some("arn:aws:lambda:us-east-1:1:layer:proxy:1".to_string());

        match cluster_operator_backend(&config) {
            OperatorBackend::Function(props) => {
                assert_eq!(props.environment["HTTPS_PROXY"], "http://proxy:3128");
                assert_eq!(props.layer.as_deref(), Some("arn:aws:lambda:us-east-1:1:layer:proxy:1"));
                assert_eq!(
                    props.handler_role_arn,
                    Some(Deferred::literal("arn:aws:iam::1:role/c"))
                );
            }
            other => panic!("expected function backend, got {}", other.name()),
        }
    }
}
