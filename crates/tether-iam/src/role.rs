//! IAM roles: planned in this stack, or imported by ARN

use serde_json::json;
use tracing::debug;

use tether_common::{
    Deferred, Error, PlannedResource, PolicyDocument, PolicyStatement, Result, Stack,
    TrustStatement,
};

/// A role that can be referenced by ARN
#[derive(Clone, Debug, PartialEq)]
pub enum Role {
    /// Planned in this stack; its policies can be extended
    Owned {
        /// Logical id of the role resource
        logical_id: String,
        /// Role ARN
        arn: Deferred,
        /// Logical id of the default policy, once created
        default_policy: Option<String>,
    },
    /// Created elsewhere; read-only
    Imported {
        /// Role ARN
        arn: Deferred,
    },
}

impl Role {
    /// Plan a role assumable under the given trust statements
    pub fn create(stack: &mut Stack, id: &str, trust: Vec<TrustStatement>) -> Result<Self> {
        let resource = PlannedResource::new(
            id,
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": PolicyDocument::new(trust) }),
        );
        let arn = resource.attribute("Arn");
        stack.plan_mut().add_resource(resource)?;
        debug!(role = %id, "planned role");
        Ok(Role::Owned {
            logical_id: id.to_string(),
            arn,
            default_policy: None,
        })
    }

    /// Reference an existing role
    pub fn from_arn(arn: impl Into<Deferred>) -> Self {
        Role::Imported { arn: arn.into() }
    }

    /// Role ARN
    pub fn arn(&self) -> &Deferred {
        match self {
            Role::Owned { arn, .. } | Role::Imported { arn } => arn,
        }
    }

    /// Logical id of a planned role
    pub fn logical_id(&self) -> Option<&str> {
        match self {
            Role::Owned { logical_id, .. } => Some(logical_id),
            Role::Imported { .. } => None,
        }
    }

    /// Whether the role was created elsewhere
    pub fn is_imported(&self) -> bool {
        matches!(self, Role::Imported { .. })
    }

    /// Grant a permission through the role's default policy
    ///
    /// The default policy is planned on first use. Imported roles cannot be
    /// modified.
    pub fn add_to_principal_policy(
        &mut self,
        stack: &mut Stack,
        statement: PolicyStatement,
    ) -> Result<()> {
        let (logical_id, default_policy) = match self {
            Role::Owned {
                logical_id,
                default_policy,
                ..
            } => (logical_id, default_policy),
            Role::Imported { .. } => {
                return Err(Error::capability(
                    "addToPrincipalPolicy",
                    "the role is imported and its policies cannot be modified",
                ))
            }
        };

        if let Some(policy_id) = default_policy.as_deref() {
            let policy = stack.plan_mut().resource_mut(policy_id).ok_or_else(|| {
                Error::internal_with_context("role", format!("default policy {policy_id} missing"))
            })?;
            match policy.properties["PolicyDocument"]["Statement"].as_array_mut() {
                Some(statements) => statements.push(serde_json::to_value(&statement)?),
                None => {
                    return Err(Error::internal_with_context(
                        "role",
                        format!("default policy {policy_id} has no statement list"),
                    ))
                }
            }
            debug!(role = %logical_id, "extended default policy");
            return Ok(());
        }

        let policy_id = format!("{logical_id}DefaultPolicy");
        let resource = PlannedResource::new(
            &policy_id,
            "AWS::IAM::Policy",
            json!({
                "PolicyName": policy_id,
                "Roles": [Deferred::reference(logical_id.as_str())],
                "PolicyDocument": PolicyDocument::new(vec![statement]),
            }),
        );
        stack.plan_mut().add_resource(resource)?;
        debug!(role = %logical_id, policy = %policy_id, "planned default policy");
        *default_policy = Some(policy_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_grant_creates_default_policy_and_later_grants_extend_it() {
        let mut stack = Stack::new("App");
        let mut role = Role::create(
            &mut stack,
            "WorkerRole",
            vec![TrustStatement::service("ec2.amazonaws.com")],
        )
        .unwrap();

        role.add_to_principal_policy(
            &mut stack,
            PolicyStatement::allow(["s3:GetObject"], ["arn:aws:s3:::b/*"]),
        )
        .unwrap();
        role.add_to_principal_policy(&mut stack, PolicyStatement::allow(["sqs:SendMessage"], ["*"]))
            .unwrap();

        let policy = stack.plan().resource("WorkerRoleDefaultPolicy").unwrap();
        assert_eq!(policy.resource_type, "AWS::IAM::Policy");
        assert_eq!(policy.properties["Roles"], json!([{"Ref": "WorkerRole"}]));
        let statements = policy.properties["PolicyDocument"]["Statement"]
            .as_array()
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1]["Action"], json!(["sqs:SendMessage"]));
        assert_eq!(stack.plan().resources_of_type("AWS::IAM::Policy").count(), 1);
    }

    #[test]
    fn imported_role_rejects_policy_changes() {
        let mut stack = Stack::new("App");
        let mut role = Role::from_arn("arn:aws:iam::1:role/existing");
        let err = role
            .add_to_principal_policy(&mut stack, PolicyStatement::allow(["s3:*"], ["*"]))
            .unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
        assert!(stack.plan().is_empty());
        assert!(role.is_imported());
        assert!(role.logical_id().is_none());
    }

    #[test]
    fn created_role_carries_its_trust_document() {
        let mut stack = Stack::new("App");
        let role =
            Role::create(&mut stack, "R", vec![TrustStatement::service("lambda.amazonaws.com")])
                .unwrap();
        assert_eq!(role.arn(), &Deferred::attribute("R", "Arn"));
        let resource = stack.plan().resource("R").unwrap();
        assert_eq!(
            resource.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"],
            json!({"Service": "lambda.amazonaws.com"})
        );
    }
}
