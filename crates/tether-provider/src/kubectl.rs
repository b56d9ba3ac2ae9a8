//! Packaged kubectl operator
//!
//! Applies manifests to a cluster. Only the packaged form exists; the unit
//! runs inside the cluster's network and assumes the creation role.

use std::sync::Arc;

use tracing::info;

use tether_common::{Deferred, OperatorHandle, Result, Stack};

use crate::constants::{
    KUBECTL_PROVIDER_OUTPUT, KUBERNETES_RESOURCE_TYPE, PARAM_CLUSTER_ARN,
    PARAM_CLUSTER_CREATION_ROLE_ARN,
};
use crate::packaged::PackagedOperatorProps;
use crate::placement::HandlerPlacement;
use crate::OperatorBackend;

/// Unit id of the packaged kubectl operator
pub const KUBECTL_PROVIDER_UNIT_ID: &str = "KubectlProvider";

/// Inputs to the packaged kubectl operator
#[derive(Clone, Debug)]
pub struct KubectlProviderProps {
    /// Content address of the unit's template
    pub template_url: String,
    /// Cluster the operator targets
    pub cluster_arn: Deferred,
    /// Role the operator assumes to talk to the cluster
    pub creation_role_arn: Deferred,
    /// Handler network placement
    pub placement: HandlerPlacement,
}

/// A deployed kubectl operator
#[derive(Clone, Debug)]
pub struct KubectlProvider {
    handle: Arc<OperatorHandle>,
    role_arn: Deferred,
}

impl KubectlProvider {
    /// Return the stack's kubectl operator, deploying it on first use
    pub fn packaged(stack: &mut Stack, props: &KubectlProviderProps) -> Result<Self> {
        let backend = OperatorBackend::Packaged(
            PackagedOperatorProps::new(
                KUBECTL_PROVIDER_UNIT_ID,
                &props.template_url,
                KUBECTL_PROVIDER_OUTPUT,
            )
            .with_parameter(PARAM_CLUSTER_ARN, props.cluster_arn.clone())
            .with_parameter(
                PARAM_CLUSTER_CREATION_ROLE_ARN,
                props.creation_role_arn.clone(),
            )
            .with_placement(props.placement.clone()),
        );
        let handle = backend.provision(stack, KUBERNETES_RESOURCE_TYPE)?;
        info!(scope = %stack.name(), "kubectl operator ready");

        Ok(Self {
            handle,
            role_arn: props.creation_role_arn.clone(),
        })
    }

    /// Address used to invoke the operator
    pub fn service_token(&self) -> &Deferred {
        self.handle.service_token()
    }

    /// Role the operator assumes
    pub fn role_arn(&self) -> &Deferred {
        &self.role_arn
    }

    /// Shared operator handle
    pub fn handle(&self) -> &Arc<OperatorHandle> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaged::unit_logical_id;
    use crate::{PARAM_SECURITY_GROUP_IDS, PARAM_SUBNET_IDS};

    fn props() -> KubectlProviderProps {
        KubectlProviderProps {
            template_url: "https://bucket/kubectl.json".to_string(),
            cluster_arn: Deferred::attribute("Cluster", "Arn"),
            creation_role_arn: Deferred::attribute("CreationRole", "Arn"),
            placement: HandlerPlacement::new(
                vec![Deferred::reference("SubnetA"), Deferred::reference("SubnetB")],
                Some(Deferred::attribute("HandlerSg", "GroupId")),
            ),
        }
    }

    /// Story: the kubectl unit receives the cluster, the creation role and the
    /// joined placement, and hands back the framework token
    #[test]
    fn story_packaged_kubectl_wires_parameters() {
        let mut stack = Stack::new("App");
        let provider = KubectlProvider::packaged(&mut stack, &props()).unwrap();

        let unit_id = unit_logical_id(KUBECTL_PROVIDER_UNIT_ID);
        assert_eq!(
            provider.service_token(),
            &Deferred::attribute(&unit_id, format!("Outputs.{KUBECTL_PROVIDER_OUTPUT}"))
        );
        assert_eq!(provider.role_arn(), &Deferred::attribute("CreationRole", "Arn"));

        let unit = stack.plan().resource(&unit_id).unwrap();
        let params = &unit.properties["Parameters"];
        assert_eq!(
            params[PARAM_CLUSTER_ARN],
            serde_json::json!({"Fn::GetAtt": ["Cluster", "Arn"]})
        );
        assert_eq!(
            params[PARAM_SUBNET_IDS],
            serde_json::json!({"Fn::Join": [",", [{"Ref": "SubnetA"}, {"Ref": "SubnetB"}]]})
        );
        assert_eq!(
            params[PARAM_SECURITY_GROUP_IDS],
            serde_json::json!({"Fn::Join": [",", [{"Fn::GetAtt": ["HandlerSg", "GroupId"]}]]})
        );
        for dependency in ["Cluster", "CreationRole", "SubnetA", "SubnetB", "HandlerSg"] {
            assert!(unit.depends_on.contains(dependency), "missing {dependency}");
        }
    }

    #[test]
    fn kubectl_operator_is_registered_once_per_scope() {
        let mut stack = Stack::new("App");
        let a = KubectlProvider::packaged(&mut stack, &props()).unwrap();
        let b = KubectlProvider::packaged(&mut stack, &props()).unwrap();
        assert!(Arc::ptr_eq(a.handle(), b.handle()));
    }

    #[test]
    fn kubectl_requires_placement() {
        let mut stack = Stack::new("App");
        let mut p = props();
        p.placement = HandlerPlacement::default();
        let err = KubectlProvider::packaged(&mut stack, &p).unwrap_err();
        assert!(err.to_string().contains("placeClusterHandlerInVpc"));
    }
}
