//! Event type naming convention.
//!
//! Lifecycle events are named `<prefix>.<kind>.<action>` and condition
//! changes `<conditionPrefix>.<conditionType>`. The prefixes live in an
//! explicitly constructed [`EventNaming`] that is handed to whoever publishes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default prefix for lifecycle events.
pub const DEFAULT_PREFIX: &str = "converge";
/// Default prefix for condition-change events.
pub const DEFAULT_CONDITION_PREFIX: &str = "converge.condition";

/// Lifecycle actions that trigger reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Created,
    Updated,
    Patched,
    Deleted,
}

impl ResourceAction {
    /// The action as used in event types.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Patched => "patched",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "patched" => Ok(Self::Patched),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::invalid_event(format!("unknown action '{other}'"))),
        }
    }
}

/// Prefixes used to build event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventNaming {
    pub prefix: String,
    pub condition_prefix: String,
}

impl Default for EventNaming {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            condition_prefix: DEFAULT_CONDITION_PREFIX.to_string(),
        }
    }
}

impl EventNaming {
    /// Create a naming scheme with explicit prefixes.
    pub fn new(prefix: impl Into<String>, condition_prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            condition_prefix: condition_prefix.into(),
        }
    }

    /// `<prefix>.<kind>.<action>`, with the kind lowercased.
    pub fn resource_event(&self, kind: &str, action: ResourceAction) -> String {
        format!("{}.{}.{}", self.prefix, kind.to_lowercase(), action)
    }

    /// `<conditionPrefix>.<conditionType>`.
    pub fn condition_event(&self, condition_type: &str) -> String {
        format!("{}.{}", self.condition_prefix, condition_type)
    }

    /// Pattern matching every lifecycle event of a kind.
    pub fn resource_pattern(&self, kind: &str) -> String {
        format!("{}.{}.*", self.prefix, kind.to_lowercase())
    }

    /// Pattern matching every condition-change event.
    pub fn condition_pattern(&self) -> String {
        format!("{}.*", self.condition_prefix)
    }
}
