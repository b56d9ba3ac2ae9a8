//! Function operator backend
//!
//! Records an execution role and an in-region function that handles lifecycle
//! events for one resource kind. The function's ARN is the service token.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use tether_common::{
    Deferred, OperatorBackendKind, OperatorHandle, Plan, PlannedResource, PolicyDocument,
    PolicyStatement, Result, TrustStatement,
};

use crate::constants::{
    DEFAULT_FUNCTION_RUNTIME, DEFAULT_FUNCTION_TIMEOUT_SECONDS, LAMBDA_BASIC_EXECUTION_POLICY,
    LAMBDA_VPC_ACCESS_POLICY,
};
use crate::placement::HandlerPlacement;

/// Settings for a function-backed operator
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionOperatorProps {
    /// Handler entry point (e.g., "index.onEvent")
    pub handler: String,
    /// Function runtime
    pub runtime: String,
    /// Invocation timeout in seconds
    pub timeout_seconds: u32,
    /// Extra permissions granted to the execution role
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy_statements: Vec<PolicyStatement>,
    /// Privileged role the handler assumes for remote calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_role_arn: Option<Deferred>,
    /// Network placement
    pub placement: HandlerPlacement,
    /// Environment variables
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Extra code layer (e.g., the awscli layer for kubectl-style handlers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

impl FunctionOperatorProps {
    /// Defaults for the given handler entry point
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            runtime: DEFAULT_FUNCTION_RUNTIME.to_string(),
            timeout_seconds: DEFAULT_FUNCTION_TIMEOUT_SECONDS,
            policy_statements: Vec::new(),
            handler_role_arn: None,
            placement: HandlerPlacement::default(),
            environment: BTreeMap::new(),
            layer: None,
        }
    }

    /// Grant an extra permission to the execution role
    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.policy_statements.push(statement);
        self
    }

    /// Let the handler assume a privileged role
    pub fn with_handler_role(mut self, role_arn: Deferred) -> Self {
        self.handler_role_arn = Some(role_arn);
        self
    }

    /// Place the handler in the network
    pub fn with_placement(mut self, placement: HandlerPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Attach a code layer
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }
}

/// Logical id prefix for a kind's operator resources
///
/// `"Custom::AWSCDKOpenIdConnectProvider"` becomes
/// `"AWSCDKOpenIdConnectProviderCustomResourceProvider"`.
pub fn provider_id(kind: &str) -> String {
    let base: String = kind
        .trim_start_matches("Custom::")
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("{base}CustomResourceProvider")
}

/// Record the function operator's resources and return its handle
pub fn record_function_operator(
    plan: &mut Plan,
    kind: &str,
    props: &FunctionOperatorProps,
) -> Result<OperatorHandle> {
    let prefix = provider_id(kind);
    let role_id = format!("{prefix}Role");
    let function_id = format!("{prefix}Handler");

    let mut managed = vec![LAMBDA_BASIC_EXECUTION_POLICY];
    if props.placement.is_placed() {
        managed.push(LAMBDA_VPC_ACCESS_POLICY);
    }

    let mut statements: Vec<serde_json::Value> = props
        .policy_statements
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;
    if let Some(handler_role) = &props.handler_role_arn {
        statements.push(json!({
            "Effect": "Allow",
            "Action": ["sts:AssumeRole"],
            "Resource": [handler_role],
        }));
    }

    let mut role_props = json!({
        "AssumeRolePolicyDocument": PolicyDocument::new(vec![
            TrustStatement::service("lambda.amazonaws.com"),
        ]),
        "ManagedPolicyArns": managed,
    });
    if !statements.is_empty() {
        role_props["Policies"] = json!([{
            "PolicyName": "Inline",
            "PolicyDocument": PolicyDocument::new(statements),
        }]);
    }
    let role = PlannedResource::new(&role_id, "AWS::IAM::Role", role_props);
    let execution_role_arn = role.attribute("Arn");
    plan.add_resource(role)?;

    let mut function_props = json!({
        "Handler": props.handler,
        "Runtime": props.runtime,
        "Timeout": props.timeout_seconds,
        "Role": execution_role_arn,
    });
    if !props.environment.is_empty() {
        function_props["Environment"] = json!({ "Variables": props.environment });
    }
    if let Some(layer) = &props.layer {
        function_props["Layers"] = json!([layer]);
    }
    if props.placement.is_placed() {
        let security_groups: Vec<&Deferred> = props.placement.security_group_id.iter().collect();
        function_props["VpcConfig"] = json!({
            "SubnetIds": props.placement.subnet_ids,
            "SecurityGroupIds": security_groups,
        });
    }
    let function = PlannedResource::new(&function_id, "AWS::Lambda::Function", function_props)
        .depends_on(&role_id);
    let service_token = function.attribute("Arn");
    plan.add_resource(function)?;

    debug!(kind = %kind, function = %function_id, "recorded function operator");

    Ok(OperatorHandle::new(
        kind,
        service_token,
        OperatorBackendKind::Function {
            execution_role_arn,
            handler_role_arn: props.handler_role_arn.clone(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: &str = "Custom::AWSCDKOpenIdConnectProvider";

    #[test]
    fn provider_id_strips_custom_prefix_and_punctuation() {
        assert_eq!(
            provider_id("Custom::AWSCDK-EKS-Cluster"),
            "AWSCDKEKSClusterCustomResourceProvider"
        );
    }

    /// Story: a function operator records a role and a function, and the
    /// function's ARN becomes the service token
    #[test]
    fn story_function_operator_records_role_and_function() {
        let mut plan = Plan::default();
        let handle =
            record_function_operator(&mut plan, KIND, &FunctionOperatorProps::new("index.handler"))
                .unwrap();

        let prefix = provider_id(KIND);
        let role = plan.resource(&format!("{prefix}Role")).unwrap();
        let function = plan.resource(&format!("{prefix}Handler")).unwrap();

        assert_eq!(role.resource_type, "AWS::IAM::Role");
        assert_eq!(
            role.properties["ManagedPolicyArns"],
            json!([LAMBDA_BASIC_EXECUTION_POLICY])
        );
        assert!(role.properties.get("Policies").is_none());
        assert_eq!(function.properties["Runtime"], DEFAULT_FUNCTION_RUNTIME);
        assert!(function.depends_on.contains(&role.logical_id));
        assert!(function.properties.get("VpcConfig").is_none());

        assert_eq!(
            handle.service_token(),
            &Deferred::attribute(format!("{prefix}Handler"), "Arn")
        );
        assert!(!handle.is_packaged());
        assert_eq!(
            handle.execution_role_arn(),
            Some(&Deferred::attribute(format!("{prefix}Role"), "Arn"))
        );
    }

    #[test]
    fn handler_role_and_statements_become_inline_policy() {
        let mut plan = Plan::default();
        let props = FunctionOperatorProps::new("index.onEvent")
            .with_statement(PolicyStatement::allow(["eks:DescribeCluster"], ["*"]))
            .with_handler_role(Deferred::attribute("CreationRole", "Arn"));
        let handle = record_function_operator(&mut plan, KIND, &props).unwrap();

        let role = plan
            .resource(&format!("{}Role", provider_id(KIND)))
            .unwrap();
        let statements = &role.properties["Policies"][0]["PolicyDocument"]["Statement"];
        assert_eq!(statements[0]["Action"], json!(["eks:DescribeCluster"]));
        assert_eq!(
            statements[1]["Resource"],
            json!([{"Fn::GetAtt": ["CreationRole", "Arn"]}])
        );
        assert_eq!(
            handle.handler_role_arn(),
            Some(&Deferred::attribute("CreationRole", "Arn"))
        );
    }

    #[test]
    fn placed_function_gets_vpc_config_and_vpc_policy() {
        let mut plan = Plan::default();
        let props = FunctionOperatorProps::new("index.handler")
            .with_placement(HandlerPlacement::new(
                vec![Deferred::literal("subnet-a")],
                Some(Deferred::literal("sg-1")),
            ))
            .with_env("AWS_STS_REGIONAL_ENDPOINTS", "regional")
            .with_layer("arn:aws:lambda:us-east-1:123:layer:awscli:1");
        record_function_operator(&mut plan, KIND, &props).unwrap();

        let prefix = provider_id(KIND);
        let role = plan.resource(&format!("{prefix}Role")).unwrap();
        let function = plan.resource(&format!("{prefix}Handler")).unwrap();
        assert_eq!(
            role.properties["ManagedPolicyArns"],
            json!([LAMBDA_BASIC_EXECUTION_POLICY, LAMBDA_VPC_ACCESS_POLICY])
        );
        assert_eq!(
            function.properties["VpcConfig"],
            json!({"SubnetIds": ["subnet-a"], "SecurityGroupIds": ["sg-1"]})
        );
        assert_eq!(
            function.properties["Environment"]["Variables"]["AWS_STS_REGIONAL_ENDPOINTS"],
            "regional"
        );
        assert_eq!(function.properties["Layers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn recording_twice_in_one_plan_is_rejected() {
        let mut plan = Plan::default();
        let props = FunctionOperatorProps::new("index.handler");
        record_function_operator(&mut plan, KIND, &props).unwrap();
        assert!(record_function_operator(&mut plan, KIND, &props).is_err());
    }
}
