//! Error types for Tether
//!
//! Errors are structured with fields so that a failed plan names the exact
//! input that was missing and the setting that enables it. Precondition and
//! capability errors are raised while the plan is being built, before any
//! resource is recorded, so they reproduce identically for identical inputs.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Tether operations
#[derive(Debug, Error)]
pub enum Error {
    /// A required input for the chosen plan path is missing
    #[error("precondition failed: missing {input} ({message}); enable with `{setting}`")]
    Precondition {
        /// The missing input (e.g., "subnets", "securityGroup", "roleArn")
        input: String,
        /// The setting that supplies or enables the input
        setting: String,
        /// Description of what is missing
        message: String,
    },

    /// An operation is not available on this object
    #[error("capability error: cannot call '{operation}': {message}")]
    Capability {
        /// The rejected operation
        operation: String,
        /// Why the operation is not available
        message: String,
    },

    /// Validation error for a resource specification
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Logical id or name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "resourcesVpcConfig.subnetIds")
        field: Option<String>,
    },

    /// A deferred value was read but the orchestration phase never produced it
    #[error("unresolved value: {logical_id}.{attribute} has no output")]
    Resolution {
        /// Logical id of the resource that should have produced the value
        logical_id: String,
        /// Attribute name, or "Ref" for the physical id
        attribute: String,
    },

    /// The attributes revision moved backwards between submissions
    #[error("attributes revision for {resource} decreased from {previous} to {current}")]
    Revision {
        /// Logical id of the resource being resubmitted
        resource: String,
        /// Revision of the prior submission
        previous: u32,
        /// Revision of the new submission
        current: u32,
    },

    /// A remote call made by an operator failed
    #[error("remote error [{operation}]: {message}")]
    Remote {
        /// The remote operation (e.g., "createCluster")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether the orchestrator may retry the event
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "cli", "handler")
        context: String,
    },
}

impl Error {
    /// Create a precondition error naming the missing input and its enabling setting
    pub fn precondition(
        input: impl Into<String>,
        setting: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Precondition {
            input: input.into(),
            setting: setting.into(),
            message: msg.into(),
        }
    }

    /// Create a capability error for a rejected operation
    pub fn capability(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Capability {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a resolution error for a missing output
    pub fn resolution(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Resolution {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a revision error
    pub fn revision(resource: impl Into<String>, previous: u32, current: u32) -> Self {
        Self::Revision {
            resource: resource.into(),
            previous,
            current,
        }
    }

    /// Create a retryable remote error
    pub fn remote(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable remote error (e.g., the remote resource entered a failed state)
    pub fn remote_permanent(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Plan-time errors (precondition, capability, validation, revision) need an
    /// input change and are never retryable. Remote errors carry their own flag.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Precondition { .. } => false,
            Error::Capability { .. } => false,
            Error::Validation { .. } => false,
            Error::Resolution { .. } => false,
            Error::Revision { .. } => false,
            Error::Remote { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error was raised while building the plan
    pub fn is_plan_time(&self) -> bool {
        matches!(
            self,
            Error::Precondition { .. }
                | Error::Capability { .. }
                | Error::Validation { .. }
                | Error::Revision { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_for_kind("json", e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization_for_kind("yaml", e.to_string())
    }
}
