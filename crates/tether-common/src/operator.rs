//! Operator handles
//!
//! An operator is the out-of-process executor that performs remote
//! create/update/delete for a resource kind. Downstream code only needs its
//! service token, so both backends produce the same [`OperatorHandle`].

use serde::Serialize;

use crate::Deferred;

/// Which backend an operator was built from
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "backend", rename_all = "camelCase")]
pub enum OperatorBackendKind {
    /// An in-region function invoked directly
    #[serde(rename_all = "camelCase")]
    Function {
        /// Role the function executes as
        execution_role_arn: Deferred,
        /// Role the handler assumes for privileged remote actions
        #[serde(skip_serializing_if = "Option::is_none")]
        handler_role_arn: Option<Deferred>,
    },
    /// A pre-built nested deployment unit
    #[serde(rename_all = "camelCase")]
    Packaged {
        /// Logical id of the nested unit
        unit_id: String,
        /// Content address of the unit's template
        template_url: String,
    },
}

/// A deployed operator, shared by every resource of its kind in a scope
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorHandle {
    kind: String,
    service_token: Deferred,
    #[serde(flatten)]
    backend: OperatorBackendKind,
}

impl OperatorHandle {
    /// Create a handle for an operator of the given kind
    pub fn new(kind: impl Into<String>, service_token: Deferred, backend: OperatorBackendKind) -> Self {
        Self {
            kind: kind.into(),
            service_token,
            backend,
        }
    }

    /// Resource kind this operator serves (e.g., "Custom::AWSCDK-EKS-Cluster")
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Address used to invoke the operator
    pub fn service_token(&self) -> &Deferred {
        &self.service_token
    }

    /// Backend the operator was built from
    pub fn backend(&self) -> &OperatorBackendKind {
        &self.backend
    }

    /// Execution role of a function operator
    pub fn execution_role_arn(&self) -> Option<&Deferred> {
        match &self.backend {
            OperatorBackendKind::Function {
                execution_role_arn, ..
            } => Some(execution_role_arn),
            OperatorBackendKind::Packaged { .. } => None,
        }
    }

    /// Privileged role a function operator's handler assumes
    pub fn handler_role_arn(&self) -> Option<&Deferred> {
        match &self.backend {
            OperatorBackendKind::Function {
                handler_role_arn, ..
            } => handler_role_arn.as_ref(),
            OperatorBackendKind::Packaged { .. } => None,
        }
    }

    /// Whether the operator is a packaged unit
    pub fn is_packaged(&self) -> bool {
        matches!(self.backend, OperatorBackendKind::Packaged { .. })
    }
}
