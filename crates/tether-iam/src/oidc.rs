//! OIDC issuer registration
//!
//! Registers the cluster's OIDC issuer with the identity service so pods can
//! exchange service account tokens for role credentials.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use tether_common::{Deferred, Error, OperatorHandle, PlannedResource, PolicyStatement, Result, Stack};
use tether_provider::{
    FunctionOperatorProps, HandlerPlacement, OperatorBackend, PackagedOperatorProps,
    OIDC_PROVIDER_OUTPUT, OIDC_PROVIDER_RESOURCE_TYPE,
};

/// Version of the trust anchor constants below
pub const OIDC_TRUST_ANCHORS_VERSION: u32 = 1;

/// Certificate thumbprints accepted for the managed cluster issuer
///
/// The issuer presents a chain whose intermediate, not the root, is checked,
/// so the thumbprint is pinned and is the same in every region.
///
/// Rotation: when the issuer's intermediate certificate changes, append the
/// new thumbprint here (keep the old one until every issuer has rolled),
/// bump [`OIDC_TRUST_ANCHORS_VERSION`], and redeploy. Changing this list
/// updates every registered issuer in place.
pub const EKS_OIDC_THUMBPRINTS: &[&str] = &["9e99a48a9960b14926bb7f3b02e22da2b0ab7280"];

/// Audiences accepted for exchanged tokens
pub const OIDC_CLIENT_IDS: &[&str] = &["sts.amazonaws.com"];

/// Separator between the account prefix and the issuer in a provider ARN
pub const OIDC_PROVIDER_ARN_MARKER: &str = ":oidc-provider/";

/// Unit id of the packaged OIDC operator
pub const OIDC_PROVIDER_UNIT_ID: &str = "AWSCDKOpenIdConnectProvider";

/// Actions the OIDC function operator needs
pub const OIDC_PROVIDER_ACTIONS: &[&str] = &[
    "iam:CreateOpenIDConnectProvider",
    "iam:DeleteOpenIDConnectProvider",
    "iam:UpdateOpenIDConnectProviderThumbprint",
    "iam:AddClientIDToOpenIDConnectProvider",
    "iam:RemoveClientIDFromOpenIDConnectProvider",
];

/// Inputs to an issuer registration
#[derive(Clone, Debug)]
pub struct OpenIdConnectProviderProps {
    /// Issuer URL; must use https
    pub url: Deferred,
    /// Content address of a packaged OIDC operator
    pub template_url: Option<String>,
    /// Handler placement; required for the packaged operator
    pub placement: HandlerPlacement,
}

impl OpenIdConnectProviderProps {
    /// Registration of `url` through the function operator
    pub fn new(url: impl Into<Deferred>) -> Self {
        Self {
            url: url.into(),
            template_url: None,
            placement: HandlerPlacement::default(),
        }
    }
}

/// A registered or imported OIDC issuer
#[derive(Clone, Debug, PartialEq)]
pub struct OpenIdConnectProvider {
    arn: Deferred,
    issuer: Deferred,
    url: Option<Deferred>,
    logical_id: Option<String>,
}

/// Strip the `...:oidc-provider/` prefix from a provider ARN
///
/// Computed at once for a literal ARN; deferred otherwise.
pub fn issuer_from_arn(arn: &Deferred) -> Result<Deferred> {
    Deferred::split_select(1, OIDC_PROVIDER_ARN_MARKER, arn.clone()).ok_or_else(|| {
        Error::validation_for_field(
            arn.to_string(),
            "openIdConnectProviderArn",
            "not an OIDC provider ARN",
        )
    })
}

impl OpenIdConnectProvider {
    /// Register an issuer in the stack
    pub fn register(stack: &mut Stack, id: &str, props: &OpenIdConnectProviderProps) -> Result<Self> {
        if let Some(url) = props.url.as_literal() {
            if !url.starts_with("https://") {
                return Err(Error::validation_for_field(id, "url", "issuer URL must use https"));
            }
        }

        let operator = Self::operator(stack, props)?;

        let resource = PlannedResource::new(
            id,
            OIDC_PROVIDER_RESOURCE_TYPE,
            json!({
                "ServiceToken": operator.service_token(),
                "ClientIDList": OIDC_CLIENT_IDS,
                "ThumbprintList": EKS_OIDC_THUMBPRINTS,
                "Url": props.url,
            }),
        );
        let arn = stack.plan_mut().add_resource(resource)?;
        let issuer = issuer_from_arn(&arn)?;

        info!(
            provider = %id,
            packaged = operator.is_packaged(),
            anchors_version = OIDC_TRUST_ANCHORS_VERSION,
            "registered OIDC issuer"
        );
        Ok(Self {
            arn,
            issuer,
            url: Some(props.url.clone()),
            logical_id: Some(id.to_string()),
        })
    }

    fn operator(stack: &mut Stack, props: &OpenIdConnectProviderProps) -> Result<Arc<OperatorHandle>> {
        let backend = match &props.template_url {
            Some(url) => OperatorBackend::Packaged(
                PackagedOperatorProps::new(OIDC_PROVIDER_UNIT_ID, url, OIDC_PROVIDER_OUTPUT)
                    .with_placement(props.placement.clone()),
            ),
            None => OperatorBackend::Function(
                FunctionOperatorProps::new("index.handler").with_statement(
                    PolicyStatement::allow(OIDC_PROVIDER_ACTIONS.iter().copied(), ["*"]),
                ),
            ),
        };
        backend.provision(stack, OIDC_PROVIDER_RESOURCE_TYPE)
    }

    /// Import an existing issuer by ARN
    pub fn from_arn(arn: impl Into<Deferred>) -> Result<Self> {
        let arn = arn.into();
        let issuer = issuer_from_arn(&arn)?;
        Ok(Self {
            arn,
            issuer,
            url: None,
            logical_id: None,
        })
    }

    /// Provider ARN
    pub fn arn(&self) -> &Deferred {
        &self.arn
    }

    /// Issuer host and path, without scheme
    pub fn issuer(&self) -> &Deferred {
        &self.issuer
    }

    /// Issuer URL, for registered providers
    pub fn url(&self) -> Option<&Deferred> {
        self.url.as_ref()
    }

    /// Logical id, for registered providers
    pub fn logical_id(&self) -> Option<&str> {
        self.logical_id.as_deref()
    }

    /// Pinned certificate thumbprints
    pub fn thumbprints(&self) -> &'static [&'static str] {
        EKS_OIDC_THUMBPRINTS
    }

    /// Accepted audiences
    pub fn client_ids(&self) -> &'static [&'static str] {
        OIDC_CLIENT_IDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::ResolvedOutputs;
    use tether_provider::{provider_id, unit_logical_id};

    const URL: &str = "https://oidc.eks.us-east-1.amazonaws.com/id/ABC";

    #[test]
    fn trust_anchors_are_fixed() {
        assert_eq!(EKS_OIDC_THUMBPRINTS, &["9e99a48a9960b14926bb7f3b02e22da2b0ab7280"]);
        assert_eq!(OIDC_CLIENT_IDS, &["sts.amazonaws.com"]);
    }

    /// Story: registering an issuer records the custom resource with the
    /// pinned thumbprint and audience, backed by the function operator
    #[test]
    fn story_register_with_function_operator() {
        let mut stack = Stack::new("App");
        let provider =
            OpenIdConnectProvider::register(&mut stack, "OidcProvider", &OpenIdConnectProviderProps::new(URL))
                .unwrap();

        let resource = stack.plan().resource("OidcProvider").unwrap();
        assert_eq!(resource.resource_type, OIDC_PROVIDER_RESOURCE_TYPE);
        assert_eq!(
            resource.properties["ThumbprintList"],
            json!(["9e99a48a9960b14926bb7f3b02e22da2b0ab7280"])
        );
        assert_eq!(resource.properties["ClientIDList"], json!(["sts.amazonaws.com"]));
        assert_eq!(resource.properties["Url"], URL);
        assert_eq!(
            resource.properties["ServiceToken"],
            json!({"Fn::GetAtt": [format!("{}Handler", provider_id(OIDC_PROVIDER_RESOURCE_TYPE)), "Arn"]})
        );

        assert_eq!(provider.arn(), &Deferred::reference("OidcProvider"));
        assert_eq!(
            serde_json::to_value(provider.issuer()).unwrap(),
            json!({"Fn::Select": [1, {"Fn::Split": [":oidc-provider/", {"Ref": "OidcProvider"}]}]})
        );
        assert_eq!(provider.thumbprints().len(), 1);
    }

    #[test]
    fn issuer_resolves_from_reported_arn() {
        let mut stack = Stack::new("App");
        let provider =
            OpenIdConnectProvider::register(&mut stack, "Oidc", &OpenIdConnectProviderProps::new(URL))
                .unwrap();

        let mut outputs = ResolvedOutputs::new();
        outputs.record_ref(
            "Oidc",
            "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC",
        );
        assert_eq!(
            provider.issuer().resolve(&outputs).unwrap(),
            "oidc.eks.us-east-1.amazonaws.com/id/ABC"
        );
    }

    #[test]
    fn packaged_operator_requires_placement() {
        let mut stack = Stack::new("App");
        let mut props = OpenIdConnectProviderProps::new(URL);
        props.template_url = Some("https://bucket/oidc.json".to_string());

        let err = OpenIdConnectProvider::register(&mut stack, "Oidc", &props).unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
        assert!(stack.plan().is_empty());
    }

    #[test]
    fn packaged_operator_supplies_the_service_token() {
        let mut stack = Stack::new("App");
        let mut props = OpenIdConnectProviderProps::new(URL);
        props.template_url = Some("https://bucket/oidc.json".to_string());
        props.placement = HandlerPlacement::new(
            vec![Deferred::literal("subnet-a")],
            Some(Deferred::literal("sg-1")),
        );

        OpenIdConnectProvider::register(&mut stack, "Oidc", &props).unwrap();
        let resource = stack.plan().resource("Oidc").unwrap();
        assert_eq!(
            resource.properties["ServiceToken"],
            json!({"Fn::GetAtt": [
                unit_logical_id(OIDC_PROVIDER_UNIT_ID),
                "Outputs.AWSCDKOpenIdConnectProviderArn"
            ]})
        );
    }

    #[test]
    fn plain_http_issuer_is_rejected() {
        let mut stack = Stack::new("App");
        let err = OpenIdConnectProvider::register(
            &mut stack,
            "Oidc",
            &OpenIdConnectProviderProps::new("http://insecure.example.org"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn imported_literal_arn_yields_literal_issuer() {
        let provider = OpenIdConnectProvider::from_arn(
            "arn:aws:iam::123456789012:oidc-provider/oidc.example.org/id/ABC",
        )
        .unwrap();
        assert_eq!(provider.issuer(), &Deferred::literal("oidc.example.org/id/ABC"));
        assert!(provider.logical_id().is_none());
    }

    #[test]
    fn imported_arn_without_marker_is_rejected() {
        assert!(OpenIdConnectProvider::from_arn("arn:aws:iam::1:role/not-oidc").is_err());
    }
}
