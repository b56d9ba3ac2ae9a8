//! Centralized constants for the tether-provider crate
//!
//! Packaged units expose fixed, versioned output names. A name that does not
//! match the unit's template leaves the reference unresolved, so every output
//! name lives here.

// =============================================================================
// Operator kinds
// =============================================================================

/// Resource type of the managed cluster custom resource
pub const CLUSTER_RESOURCE_TYPE: &str = "Custom::AWSCDK-EKS-Cluster";

/// Resource type of the OIDC issuer registration custom resource
pub const OIDC_PROVIDER_RESOURCE_TYPE: &str = "Custom::AWSCDKOpenIdConnectProvider";

/// Resource type of the JSON-materializing proxy custom resource
pub const JSON_PROXY_RESOURCE_TYPE: &str = "Custom::AWSCDKCfnJson";

/// Resource type of the Kubernetes manifest custom resource
pub const KUBERNETES_RESOURCE_TYPE: &str = "Custom::AWSCDK-EKS-KubernetesResource";

// =============================================================================
// Packaged unit outputs
// =============================================================================

/// Service token output of the packaged cluster operator
pub const CLUSTER_PROVIDER_OUTPUT: &str = "ClusterResourceProviderframeworkonEventC6B02E13Arn";

/// Service token output of the packaged kubectl operator
pub const KUBECTL_PROVIDER_OUTPUT: &str = "KubectlProviderframeworkonEventC84E6CE2Arn";

/// Service token output of the packaged OIDC provider operator
pub const OIDC_PROVIDER_OUTPUT: &str = "AWSCDKOpenIdConnectProviderArn";

/// Service token output of the packaged JSON utilities operator
pub const JSON_PROXY_PROVIDER_OUTPUT: &str = "AWSCDKCfnUtilsProviderArn";

// =============================================================================
// Packaged unit parameters
// =============================================================================

/// Creation role the packaged cluster and kubectl operators assume
pub const PARAM_CLUSTER_CREATION_ROLE_ARN: &str = "ClusterCreationRoleArn";

/// Comma-joined subnet ids for the operator's network placement
pub const PARAM_SUBNET_IDS: &str = "SubnetIds";

/// Comma-joined security group ids for the operator's network placement
pub const PARAM_SECURITY_GROUP_IDS: &str = "SecurityGroupIds";

/// Cluster ARN for the packaged kubectl operator
pub const PARAM_CLUSTER_ARN: &str = "ClusterArn";

// =============================================================================
// Packaged unit resource
// =============================================================================

/// Resource type of a nested deployment unit
pub const NESTED_UNIT_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

// =============================================================================
// Function operator defaults
// =============================================================================

/// Runtime of function operators
pub const DEFAULT_FUNCTION_RUNTIME: &str = "nodejs18.x";

/// Timeout of function operators, in seconds
pub const DEFAULT_FUNCTION_TIMEOUT_SECONDS: u32 = 900;

/// Managed policy granting function logging
pub const LAMBDA_BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Managed policy granting network interface management for placed functions
pub const LAMBDA_VPC_ACCESS_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaVPCAccessExecutionRole";

/// Setting that enables network placement of operator handlers
pub const PLACEMENT_SETTING: &str = "placeClusterHandlerInVpc";

/// Setting that supplies the operator handler security group
pub const SECURITY_GROUP_SETTING: &str = "clusterHandlerSecurityGroup";
