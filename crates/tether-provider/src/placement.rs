//! Network placement of operator handlers

use serde::Serialize;

use tether_common::{Deferred, Error, Result, LIST_PARAMETER_SEPARATOR};

use crate::constants::{PLACEMENT_SETTING, SECURITY_GROUP_SETTING};

/// Subnets and security group an operator handler runs in
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandlerPlacement {
    /// Subnets the handler is attached to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_ids: Vec<Deferred>,
    /// Security group the handler runs with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<Deferred>,
}

/// Placement flattened into the comma-joined form packaged units accept
#[derive(Clone, Debug, PartialEq)]
pub struct PlacementParameters {
    /// Joined subnet ids
    pub subnet_ids: Deferred,
    /// Joined security group ids
    pub security_group_ids: Deferred,
}

impl HandlerPlacement {
    /// Placement in the given subnets with a security group
    pub fn new(subnet_ids: Vec<Deferred>, security_group_id: Option<Deferred>) -> Self {
        Self {
            subnet_ids,
            security_group_id,
        }
    }

    /// Whether the handler is attached to any subnet
    pub fn is_placed(&self) -> bool {
        !self.subnet_ids.is_empty()
    }

    /// Placement as packaged-unit parameters
    ///
    /// Packaged operators always run inside the network, so both subnets and
    /// a security group are mandatory.
    pub fn require(&self) -> Result<PlacementParameters> {
        if self.subnet_ids.is_empty() {
            return Err(Error::precondition(
                "subnets",
                PLACEMENT_SETTING,
                "packaged operators require the handler to be placed in private subnets",
            ));
        }
        let security_group = self.security_group_id.clone().ok_or_else(|| {
            Error::precondition(
                "securityGroup",
                SECURITY_GROUP_SETTING,
                "packaged operators require a security group for the handler",
            )
        })?;

        Ok(PlacementParameters {
            subnet_ids: Deferred::join(LIST_PARAMETER_SEPARATOR, self.subnet_ids.clone()),
            security_group_ids: Deferred::join(LIST_PARAMETER_SEPARATOR, vec![security_group]),
        })
    }
}
