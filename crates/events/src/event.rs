//! The immutable event envelope.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Extension carrying the kind of the resource an event is about.
pub const EXT_RESOURCE_KIND: &str = "resourceKind";
/// Extension carrying the uid of the resource an event is about.
pub const EXT_RESOURCE_UID: &str = "resourceUID";
/// Extension carrying the lifecycle action (created, updated, ...).
pub const EXT_ACTION: &str = "action";

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Create a new random event ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A notification of a state change.
///
/// Built once by a producer and read-only afterwards; the bus shares a
/// single instance between all matching handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    source: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    extensions: BTreeMap<String, String>,
}

impl Event {
    /// Create an event with a fresh id and the current time.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
            extensions: BTreeMap::new(),
        }
    }

    /// Create an event about a resource, filling the kind/uid/action extensions.
    pub fn for_resource(
        event_type: impl Into<String>,
        source: impl Into<String>,
        resource_kind: impl Into<String>,
        resource_uid: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::new(event_type, source)
            .with_extension(EXT_RESOURCE_KIND, resource_kind)
            .with_extension(EXT_RESOURCE_UID, resource_uid)
            .with_extension(EXT_ACTION, action)
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach an extension attribute.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Get the event ID.
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Get the dot-delimited event type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Get the producer of the event.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the event timestamp.
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Get the opaque payload.
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Get all extension attributes.
    pub const fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }

    /// Get a single extension attribute.
    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }

    /// Kind of the resource this event is about, if set and non-empty.
    pub fn resource_kind(&self) -> Option<&str> {
        self.extension(EXT_RESOURCE_KIND).filter(|k| !k.is_empty())
    }

    /// Uid of the resource this event is about, if set and non-empty.
    pub fn resource_uid(&self) -> Option<&str> {
        self.extension(EXT_RESOURCE_UID).filter(|u| !u.is_empty())
    }

    /// Lifecycle action, if set.
    pub fn action(&self) -> Option<&str> {
        self.extension(EXT_ACTION)
    }

    /// Check that the type is a concrete dot-delimited name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent` for empty types, empty segments, or wildcard
    /// segments.
    pub fn validate(&self) -> Result<()> {
        validate_event_type(&self.event_type)
    }
}

/// Check that an event type is non-empty with no empty or wildcard segments.
///
/// # Errors
///
/// Returns `InvalidEvent` describing the first problem found.
pub fn validate_event_type(event_type: &str) -> Result<()> {
    if event_type.is_empty() {
        return Err(Error::invalid_event("event type must not be empty"));
    }
    for segment in event_type.split('.') {
        if segment.is_empty() {
            return Err(Error::invalid_event(format!(
                "event type '{event_type}' has an empty segment"
            )));
        }
        if segment == "*" || segment == "**" {
            return Err(Error::invalid_event(format!(
                "event type '{event_type}' must not contain wildcards"
            )));
        }
    }
    Ok(())
}
