//! Deferred values and two-phase resolution
//!
//! Planning never waits for an operator. Anything an operator produces (a
//! cluster endpoint, a role ARN, a nested unit output) is represented as a
//! [`Deferred`] value. The plan records deferred values in the engine's
//! intrinsic form; once the orchestration phase has run the operators it hands
//! back a [`ResolvedOutputs`] table and callers turn their handles into
//! concrete values with [`Deferred::resolve`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

use crate::{Error, Result};

/// Pseudo-attribute name used in resolution errors for a resource's physical id
pub const REF_ATTRIBUTE: &str = "Ref";

/// A value that may not be known until after remote execution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deferred {
    /// A value known at plan time
    Literal(String),
    /// The physical id of a planned resource
    Ref(String),
    /// A named output attribute of a planned resource
    Attribute {
        /// Logical id of the producing resource
        logical_id: String,
        /// Attribute name (e.g., "Endpoint", "Outputs.RoleArn")
        attribute: String,
    },
    /// Concatenation of values with a separator
    Join {
        /// Separator placed between parts
        separator: String,
        /// Parts to join
        parts: Vec<Deferred>,
    },
    /// The `index`-th segment of `source` split on `separator`
    Select {
        /// Segment index
        index: usize,
        /// Separator to split on
        separator: String,
        /// Value to split
        source: Box<Deferred>,
    },
}

impl Deferred {
    /// A value known at plan time
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// The physical id of a planned resource
    pub fn reference(logical_id: impl Into<String>) -> Self {
        Self::Ref(logical_id.into())
    }

    /// A named output attribute of a planned resource
    pub fn attribute(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Attribute {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    /// Join values with a separator
    ///
    /// Collapses to a literal when every part is already known.
    pub fn join(separator: impl Into<String>, parts: Vec<Deferred>) -> Self {
        let separator = separator.into();
        let literals: Option<Vec<&str>> = parts.iter().map(Deferred::as_literal).collect();
        match literals {
            Some(values) => Self::Literal(values.join(&separator)),
            None => Self::Join { separator, parts },
        }
    }

    /// Select the `index`-th segment of `source` split on `separator`
    ///
    /// Computed immediately for literals; a literal without enough segments
    /// yields `None`.
    pub fn split_select(index: usize, separator: impl Into<String>, source: Deferred) -> Option<Self> {
        let separator = separator.into();
        match source {
            Deferred::Literal(value) => value
                .split(separator.as_str())
                .nth(index)
                .map(|segment| Self::Literal(segment.to_string())),
            source => Some(Self::Select {
                index,
                separator,
                source: Box::new(source),
            }),
        }
    }

    /// The plan-time value, if this is a literal
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Deferred::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the value is known at plan time
    pub fn is_resolved(&self) -> bool {
        matches!(self, Deferred::Literal(_))
    }

    /// Whether this is a literal empty string
    pub fn is_empty_literal(&self) -> bool {
        matches!(self, Deferred::Literal(value) if value.trim().is_empty())
    }

    /// Logical ids of every planned resource this value reads from
    pub fn referenced_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut BTreeSet<String>) {
        match self {
            Deferred::Literal(_) => {}
            Deferred::Ref(id) => {
                ids.insert(id.clone());
            }
            Deferred::Attribute { logical_id, .. } => {
                ids.insert(logical_id.clone());
            }
            Deferred::Join { parts, .. } => parts.iter().for_each(|p| p.collect_ids(ids)),
            Deferred::Select { source, .. } => source.collect_ids(ids),
        }
    }

    /// Resolve against the outputs reported by the orchestration phase
    pub fn resolve(&self, outputs: &ResolvedOutputs) -> Result<String> {
        match self {
            Deferred::Literal(value) => Ok(value.clone()),
            Deferred::Ref(id) => outputs
                .reference(id)
                .map(str::to_string)
                .ok_or_else(|| Error::resolution(id, REF_ATTRIBUTE)),
            Deferred::Attribute {
                logical_id,
                attribute,
            } => outputs
                .attribute(logical_id, attribute)
                .map(str::to_string)
                .ok_or_else(|| Error::resolution(logical_id, attribute)),
            Deferred::Join { separator, parts } => {
                let resolved = parts
                    .iter()
                    .map(|p| p.resolve(outputs))
                    .collect::<Result<Vec<_>>>()?;
                Ok(resolved.join(separator))
            }
            Deferred::Select {
                index,
                separator,
                source,
            } => {
                let value = source.resolve(outputs)?;
                value
                    .split(separator.as_str())
                    .nth(*index)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::validation(format!(
                            "value '{}' has no segment {} when split on '{}'",
                            value, index, separator
                        ))
                    })
            }
        }
    }
}

impl From<&str> for Deferred {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Deferred {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<&String> for Deferred {
    fn from(value: &String) -> Self {
        Self::Literal(value.clone())
    }
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Literal(value) => write!(f, "{value}"),
            Deferred::Ref(id) => write!(f, "${{{id}}}"),
            Deferred::Attribute {
                logical_id,
                attribute,
            } => write!(f, "${{{logical_id}.{attribute}}}"),
            Deferred::Join { separator, parts } => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{separator}")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Deferred::Select {
                index,
                separator,
                source,
            } => write!(f, "${{select({index}, split('{separator}', {source}))}}"),
        }
    }
}

/// Serializes into the deployment engine's intrinsic function form
impl Serialize for Deferred {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Deferred::Literal(value) => serializer.serialize_str(value),
            Deferred::Ref(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", id)?;
                map.end()
            }
            Deferred::Attribute {
                logical_id,
                attribute,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &[logical_id, attribute])?;
                map.end()
            }
            Deferred::Join { separator, parts } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Join", &JoinArgs { separator, parts })?;
                map.end()
            }
            Deferred::Select {
                index,
                separator,
                source,
            } => {
                let split = serde_json::json!({ "Fn::Split": [separator, source] });
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Select", &(index, split))?;
                map.end()
            }
        }
    }
}

struct JoinArgs<'a> {
    separator: &'a str,
    parts: &'a [Deferred],
}

impl Serialize for JoinArgs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(self.separator)?;
        seq.serialize_element(self.parts)?;
        seq.end()
    }
}

/// Outputs reported for one resource after its operator finished
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOutputs {
    /// Physical id of the resource
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
    /// Named output attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Outputs produced by the orchestration phase, keyed by logical id
///
/// This is the second half of the two-phase API: planning produces handles
/// full of [`Deferred`] values, the orchestrator fills this table.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolvedOutputs {
    #[serde(flatten)]
    resources: BTreeMap<String, ResourceOutputs>,
}

impl ResolvedOutputs {
    /// Create an empty output table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the physical id of a resource
    pub fn record_ref(&mut self, logical_id: impl Into<String>, physical_id: impl Into<String>) {
        self.resources.entry(logical_id.into()).or_default().physical_id =
            Some(physical_id.into());
    }

    /// Record a named output attribute of a resource
    pub fn record_attribute(
        &mut self,
        logical_id: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.resources
            .entry(logical_id.into())
            .or_default()
            .attributes
            .insert(attribute.into(), value.into());
    }

    /// Physical id of a resource, if reported
    pub fn reference(&self, logical_id: &str) -> Option<&str> {
        self.resources
            .get(logical_id)
            .and_then(|r| r.physical_id.as_deref())
    }

    /// Output attribute of a resource, if reported
    pub fn attribute(&self, logical_id: &str, attribute: &str) -> Option<&str> {
        self.resources
            .get(logical_id)
            .and_then(|r| r.attributes.get(attribute))
            .map(String::as_str)
    }

    /// Whether nothing has been reported yet
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
