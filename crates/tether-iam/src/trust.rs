//! Web-identity trust synthesis
//!
//! A workload role trusts the cluster's OIDC issuer, but only for tokens
//! minted for one service account. The condition keys embed the issuer, and
//! the issuer is usually not known until the issuer registration has run, so
//! the condition map itself may have to be materialized by an operator.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use tether_common::{
    Deferred, Effect, Error, PlannedResource, Principal, ResolvedOutputs, Result, Stack,
    TrustStatement,
};
use tether_provider::{
    FunctionOperatorProps, OperatorBackend, PackagedOperatorProps, JSON_PROXY_PROVIDER_OUTPUT,
    JSON_PROXY_RESOURCE_TYPE,
};

use crate::oidc::OpenIdConnectProvider;

/// Audience of exchanged service account tokens
pub const WEB_IDENTITY_AUDIENCE: &str = "sts.amazonaws.com";

/// Action a federated principal is admitted for
pub const WEB_IDENTITY_ACTION: &str = "sts:AssumeRoleWithWebIdentity";

/// Condition operator for the trust conditions
pub const STRING_EQUALS: &str = "StringEquals";

/// Output attribute of a materialized JSON value
pub const JSON_VALUE_ATTRIBUTE: &str = "Value";

/// Unit id of the packaged JSON utilities operator
pub const JSON_PROXY_UNIT_ID: &str = "AWSCDKCfnUtilsProvider";

/// Subject claim of a service account token
pub fn service_account_subject(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{namespace}:{name}")
}

/// Condition map for a known issuer
pub fn trust_conditions(issuer: &str, namespace: &str, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (format!("{issuer}:aud"), WEB_IDENTITY_AUDIENCE.to_string()),
        (format!("{issuer}:sub"), service_account_subject(namespace, name)),
    ])
}

/// How a condition map with deferred keys is turned into JSON
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum JsonMaterialization {
    /// Inline when the issuer is known; otherwise a function operator
    /// materializes the map
    #[default]
    Native,
    /// A packaged JSON utilities operator materializes the map
    #[serde(rename_all = "camelCase")]
    Proxy {
        /// Content address of the packaged operator
        provider_template_url: String,
    },
}

/// Where the condition map lives in the plan
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionValue {
    /// Known at plan time and embedded in the trust document
    Inline(BTreeMap<String, String>),
    /// Produced by a JSON materialization resource
    Materialized {
        /// Logical id of the materialization resource
        logical_id: String,
        /// The JSON text it was asked to materialize
        json: Deferred,
    },
}

/// A role's trust in one service account of one issuer
#[derive(Clone, Debug, PartialEq)]
pub struct TrustBinding {
    provider_arn: Deferred,
    issuer: Deferred,
    subject: String,
    condition: ConditionValue,
}

impl TrustBinding {
    /// Build the binding, materializing the condition map if needed
    ///
    /// `id` scopes the materialization resource.
    pub fn synthesize(
        stack: &mut Stack,
        id: &str,
        provider: &OpenIdConnectProvider,
        namespace: &str,
        name: &str,
        json: &JsonMaterialization,
    ) -> Result<Self> {
        let issuer = provider.issuer().clone();
        let subject = service_account_subject(namespace, name);

        let condition = match (json, issuer.as_literal()) {
            (JsonMaterialization::Native, Some(known)) => {
                ConditionValue::Inline(trust_conditions(known, namespace, name))
            }
            _ => {
                let backend = match json {
                    JsonMaterialization::Native => {
                        OperatorBackend::Function(FunctionOperatorProps::new("index.handler"))
                    }
                    JsonMaterialization::Proxy {
                        provider_template_url,
                    } => OperatorBackend::Packaged(PackagedOperatorProps::new(
                        JSON_PROXY_UNIT_ID,
                        provider_template_url,
                        JSON_PROXY_PROVIDER_OUTPUT,
                    )),
                };
                check_materialization_backend(stack, json)?;
                let operator = backend.provision(stack, JSON_PROXY_RESOURCE_TYPE)?;

                let logical_id = format!("{id}ConditionJson");
                let json_text = condition_json(&issuer, namespace, name)?;
                let resource = PlannedResource::new(
                    &logical_id,
                    JSON_PROXY_RESOURCE_TYPE,
                    json!({
                        "ServiceToken": operator.service_token(),
                        "Value": json_text,
                    }),
                );
                stack.plan_mut().add_resource(resource)?;
                debug!(binding = %id, backend = backend.name(), "materializing trust conditions");
                ConditionValue::Materialized {
                    logical_id,
                    json: json_text,
                }
            }
        };

        Ok(Self {
            provider_arn: provider.arn().clone(),
            issuer,
            subject,
            condition,
        })
    }

    /// Issuer the binding trusts
    pub fn issuer(&self) -> &Deferred {
        &self.issuer
    }

    /// Audience the binding requires
    pub fn audience(&self) -> &'static str {
        WEB_IDENTITY_AUDIENCE
    }

    /// Subject the binding requires
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Where the condition map lives
    pub fn condition(&self) -> &ConditionValue {
        &self.condition
    }

    /// The trust statement, in plan form
    pub fn statement(&self) -> TrustStatement {
        let value = match &self.condition {
            ConditionValue::Inline(map) => json!(map),
            ConditionValue::Materialized { logical_id, .. } => {
                json!(Deferred::attribute(logical_id, JSON_VALUE_ATTRIBUTE))
            }
        };
        TrustStatement {
            effect: Effect::Allow,
            principal: Principal::Federated(self.provider_arn.clone()),
            action: WEB_IDENTITY_ACTION.to_string(),
            condition: BTreeMap::from([(STRING_EQUALS.to_string(), value)]),
        }
    }

    /// The condition map once outputs are known
    pub fn resolve_conditions(&self, outputs: &ResolvedOutputs) -> Result<BTreeMap<String, String>> {
        match &self.condition {
            ConditionValue::Inline(map) => Ok(map.clone()),
            ConditionValue::Materialized { logical_id, .. } => {
                let text = Deferred::attribute(logical_id, JSON_VALUE_ATTRIBUTE).resolve(outputs)?;
                serde_json::from_str(&text).map_err(|e| {
                    Error::serialization_for_kind(
                        "json",
                        format!("{logical_id}.{JSON_VALUE_ATTRIBUTE} is not a condition map: {e}"),
                    )
                })
            }
        }
    }

    /// The trust document once outputs are known
    pub fn resolve_statement(&self, outputs: &ResolvedOutputs) -> Result<TrustStatement> {
        let provider_arn = self.provider_arn.resolve(outputs)?;
        let conditions = self.resolve_conditions(outputs)?;
        Ok(TrustStatement {
            effect: Effect::Allow,
            principal: Principal::Federated(Deferred::literal(provider_arn)),
            action: WEB_IDENTITY_ACTION.to_string(),
            condition: BTreeMap::from([(STRING_EQUALS.to_string(), json!(conditions))]),
        })
    }
}

/// One JSON operator serves a scope, so a later binding must ask for the
/// backend that was registered first
fn check_materialization_backend(stack: &Stack, json: &JsonMaterialization) -> Result<()> {
    let Some(existing) = stack.registry().get(stack.name(), JSON_PROXY_RESOURCE_TYPE) else {
        return Ok(());
    };
    let wants_packaged = matches!(json, JsonMaterialization::Proxy { .. });
    if existing.is_packaged() == wants_packaged {
        return Ok(());
    }
    let registered = if existing.is_packaged() { "packaged" } else { "function" };
    Err(Error::precondition(
        "jsonProvider",
        "cfnJsonProviderTemplateUrl",
        format!(
            "scope '{}' already materializes trust conditions with a {registered} operator; \
             every binding in a scope must use the same JSON materialization",
            stack.name()
        ),
    ))
}

/// JSON text of the condition map
///
/// A literal issuer is serialized in full. A deferred one is spliced between
/// escaped literal fragments.
fn condition_json(issuer: &Deferred, namespace: &str, name: &str) -> Result<Deferred> {
    if let Some(known) = issuer.as_literal() {
        let text = serde_json::to_string(&trust_conditions(known, namespace, name))?;
        return Ok(Deferred::literal(text));
    }
    let audience = serde_json::to_string(WEB_IDENTITY_AUDIENCE)?;
    let subject = serde_json::to_string(&service_account_subject(namespace, name))?;
    Ok(Deferred::join(
        "",
        vec![
            Deferred::literal("{\""),
            issuer.clone(),
            Deferred::literal(format!(":aud\":{audience},\"")),
            issuer.clone(),
            Deferred::literal(format!(":sub\":{subject}}}")),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::PolicyDocument;
    use tether_provider::unit_logical_id;

    const PROVIDER_ARN: &str = "arn:aws:iam::123456789012:oidc-provider/oidc.example.org/id/ABC";

    fn registered(stack: &mut Stack) -> OpenIdConnectProvider {
        crate::oidc::OpenIdConnectProvider::register(
            stack,
            "Oidc",
            &crate::oidc::OpenIdConnectProviderProps::new("https://oidc.example.org/id/ABC"),
        )
        .unwrap()
    }

    fn outputs_for(binding: &TrustBinding) -> ResolvedOutputs {
        let mut outputs = ResolvedOutputs::new();
        outputs.record_ref("Oidc", PROVIDER_ARN);
        // The materialization operator echoes the JSON it was given
        if let ConditionValue::Materialized { logical_id, json } = binding.condition() {
            let text = json.resolve(&outputs).unwrap();
            outputs.record_attribute(logical_id, JSON_VALUE_ATTRIBUTE, text);
        }
        outputs
    }

    #[test]
    fn condition_map_for_known_issuer_is_exact() {
        let expected = BTreeMap::from([
            (
                "oidc.example.org/id/ABC:aud".to_string(),
                "sts.amazonaws.com".to_string(),
            ),
            (
                "oidc.example.org/id/ABC:sub".to_string(),
                "system:serviceaccount:default:my-sa".to_string(),
            ),
        ]);
        assert_eq!(
            trust_conditions("oidc.example.org/id/ABC", "default", "my-sa"),
            expected
        );
    }

    #[test]
    fn known_issuer_is_inlined_without_extra_resources() {
        let mut stack = Stack::new("App");
        let provider = OpenIdConnectProvider::from_arn(PROVIDER_ARN).unwrap();
        let binding = TrustBinding::synthesize(
            &mut stack,
            "Sa",
            &provider,
            "default",
            "my-sa",
            &JsonMaterialization::Native,
        )
        .unwrap();

        assert!(stack.plan().is_empty());
        let doc = serde_json::to_value(PolicyDocument::new(vec![binding.statement()])).unwrap();
        assert_eq!(
            doc,
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Federated": PROVIDER_ARN},
                    "Action": "sts:AssumeRoleWithWebIdentity",
                    "Condition": {"StringEquals": {
                        "oidc.example.org/id/ABC:aud": "sts.amazonaws.com",
                        "oidc.example.org/id/ABC:sub": "system:serviceaccount:default:my-sa"
                    }}
                }]
            })
        );
    }

    /// Story: the issuer is only known after registration runs, so a native
    /// materialization resource builds the map and the trust statement
    /// references its output
    #[test]
    fn story_deferred_issuer_uses_native_materialization() {
        let mut stack = Stack::new("App");
        let provider = registered(&mut stack);
        let binding = TrustBinding::synthesize(
            &mut stack,
            "Sa",
            &provider,
            "default",
            "my-sa",
            &JsonMaterialization::Native,
        )
        .unwrap();

        let resource = stack.plan().resource("SaConditionJson").unwrap();
        assert_eq!(resource.resource_type, JSON_PROXY_RESOURCE_TYPE);
        assert_eq!(
            resource.properties["ServiceToken"]["Fn::GetAtt"][1],
            "Arn",
            "native materialization runs on a function operator"
        );
        assert_eq!(
            serde_json::to_value(binding.statement()).unwrap()["Condition"],
            json!({"StringEquals": {"Fn::GetAtt": ["SaConditionJson", "Value"]}})
        );

        let resolved = binding.resolve_conditions(&outputs_for(&binding)).unwrap();
        assert_eq!(
            resolved,
            trust_conditions("oidc.example.org/id/ABC", "default", "my-sa")
        );
    }

    #[test]
    fn proxy_materialization_uses_the_packaged_operator() {
        let mut stack = Stack::new("App");
        let provider = OpenIdConnectProvider::from_arn(PROVIDER_ARN).unwrap();
        let json = JsonMaterialization::Proxy {
            provider_template_url: "https://bucket/cfn-utils.json".to_string(),
        };
        let binding =
            TrustBinding::synthesize(&mut stack, "Sa", &provider, "default", "my-sa", &json).unwrap();

        let resource = stack.plan().resource("SaConditionJson").unwrap();
        assert_eq!(
            resource.properties["ServiceToken"],
            json!({"Fn::GetAtt": [
                unit_logical_id(JSON_PROXY_UNIT_ID),
                "Outputs.AWSCDKCfnUtilsProviderArn"
            ]})
        );
        // Issuer is literal here, so the value is plain JSON text
        assert_eq!(
            resource.properties["Value"],
            "{\"oidc.example.org/id/ABC:aud\":\"sts.amazonaws.com\",\"oidc.example.org/id/ABC:sub\":\"system:serviceaccount:default:my-sa\"}"
        );
    }

    #[test]
    fn literal_issuer_is_escaped_in_materialized_json() {
        let mut stack = Stack::new("App");
        let provider = OpenIdConnectProvider::from_arn(
            "arn:aws:iam::1:oidc-provider/oidc.example.org/id/A\"B\\C",
        )
        .unwrap();
        let json = JsonMaterialization::Proxy {
            provider_template_url: "https://bucket/cfn-utils.json".to_string(),
        };
        TrustBinding::synthesize(&mut stack, "Sa", &provider, "default", "my-sa", &json).unwrap();

        let value = &stack.plan().resource("SaConditionJson").unwrap().properties["Value"];
        let parsed: BTreeMap<String, String> =
            serde_json::from_str(value.as_str().unwrap()).unwrap();
        assert_eq!(
            parsed,
            trust_conditions("oidc.example.org/id/A\"B\\C", "default", "my-sa")
        );
    }

    mod mixed_backends {
        use super::*;

        fn proxy() -> JsonMaterialization {
            JsonMaterialization::Proxy {
                provider_template_url: "https://bucket/cfn-utils.json".to_string(),
            }
        }

        fn bind(
            stack: &mut Stack,
            id: &str,
            provider: &OpenIdConnectProvider,
            json: &JsonMaterialization,
        ) -> Result<TrustBinding> {
            TrustBinding::synthesize(stack, id, provider, "default", id, json)
        }

        /// Story: a scope first materializes through the function operator,
        /// then a later binding asks for the packaged one; it must not be
        /// handed the function silently
        #[test]
        fn story_proxy_after_native_is_rejected() {
            let mut stack = Stack::new("App");
            let provider = registered(&mut stack);
            bind(&mut stack, "first", &provider, &JsonMaterialization::Native).unwrap();
            let before = stack.plan().len();

            let err = bind(&mut stack, "second", &provider, &proxy()).unwrap_err();
            match err {
                Error::Precondition { input, setting, .. } => {
                    assert_eq!(input, "jsonProvider");
                    assert_eq!(setting, "cfnJsonProviderTemplateUrl");
                }
                other => panic!("expected precondition error, got {other:?}"),
            }
            assert_eq!(stack.plan().len(), before);
            assert!(stack.plan().resource("secondConditionJson").is_none());
        }

        #[test]
        fn native_after_proxy_is_rejected() {
            let mut stack = Stack::new("App");
            let provider = registered(&mut stack);
            bind(&mut stack, "first", &provider, &proxy()).unwrap();
            let err = bind(&mut stack, "second", &provider, &JsonMaterialization::Native).unwrap_err();
            assert!(err.to_string().contains("packaged operator"));
        }

        #[test]
        fn same_backend_shares_the_operator() {
            let mut stack = Stack::new("App");
            let provider = registered(&mut stack);
            bind(&mut stack, "first", &provider, &proxy()).unwrap();
            bind(&mut stack, "second", &provider, &proxy()).unwrap();

            let first = &stack.plan().resource("firstConditionJson").unwrap().properties;
            let second = &stack.plan().resource("secondConditionJson").unwrap().properties;
            assert_eq!(first["ServiceToken"], second["ServiceToken"]);
        }

        #[test]
        fn known_issuer_never_needs_an_operator() {
            let mut stack = Stack::new("App");
            let deferred = registered(&mut stack);
            bind(&mut stack, "first", &deferred, &proxy()).unwrap();

            let known = OpenIdConnectProvider::from_arn(PROVIDER_ARN).unwrap();
            let binding =
                bind(&mut stack, "second", &known, &JsonMaterialization::Native).unwrap();
            assert!(matches!(binding.condition(), ConditionValue::Inline(_)));
        }
    }

    #[test]
    fn native_and_proxy_resolve_to_the_same_document() {
        let mut native_stack = Stack::new("App");
        let native_provider = registered(&mut native_stack);
        let native = TrustBinding::synthesize(
            &mut native_stack,
            "Sa",
            &native_provider,
            "kube-system",
            "controller",
            &JsonMaterialization::Native,
        )
        .unwrap();

        let mut proxy_stack = Stack::new("App");
        let proxy_provider = registered(&mut proxy_stack);
        let proxy = TrustBinding::synthesize(
            &mut proxy_stack,
            "Sa",
            &proxy_provider,
            "kube-system",
            "controller",
            &JsonMaterialization::Proxy {
                provider_template_url: "https://bucket/cfn-utils.json".to_string(),
            },
        )
        .unwrap();

        assert_eq!(
            native.resolve_statement(&outputs_for(&native)).unwrap(),
            proxy.resolve_statement(&outputs_for(&proxy)).unwrap()
        );
    }

    #[test]
    fn missing_materialized_value_is_a_resolution_error() {
        let mut stack = Stack::new("App");
        let provider = registered(&mut stack);
        let binding = TrustBinding::synthesize(
            &mut stack,
            "Sa",
            &provider,
            "default",
            "my-sa",
            &JsonMaterialization::Native,
        )
        .unwrap();
        let err = binding.resolve_conditions(&ResolvedOutputs::new()).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn subject_and_audience_are_exposed() {
        let mut stack = Stack::new("App");
        let provider = OpenIdConnectProvider::from_arn(PROVIDER_ARN).unwrap();
        let binding = TrustBinding::synthesize(
            &mut stack,
            "Sa",
            &provider,
            "apps",
            "api",
            &JsonMaterialization::Native,
        )
        .unwrap();
        assert_eq!(binding.subject(), "system:serviceaccount:apps:api");
        assert_eq!(binding.audience(), "sts.amazonaws.com");
        assert_eq!(binding.issuer(), &Deferred::literal("oidc.example.org/id/ABC"));
    }
}
