//! Kind-tagged resource envelope.
//!
//! Resources are loaded from storage as generic JSON documents. The envelope
//! only knows the resource kind, its uid, and two well-known locations inside
//! the document: the `status` subtree and `metadata.updatedAt`. Everything
//! else is opaque until a reconciler decodes the document into its own type.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition::{self, Condition, ConditionStatus, ConditionTransition};
use crate::error::{Error, Result};

/// Document key holding resource metadata.
pub const METADATA_FIELD: &str = "metadata";
/// Document key holding the desired state.
pub const SPEC_FIELD: &str = "spec";
/// Document key holding the observed state.
pub const STATUS_FIELD: &str = "status";
/// Metadata key holding the last modification timestamp (RFC 3339).
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Status key holding the condition list.
pub const CONDITIONS_FIELD: &str = "conditions";

/// Accessors every reconcilable resource exposes.
pub trait ResourceRef {
    /// The resource kind, e.g. `Device`.
    fn resource_kind(&self) -> &str;

    /// The unique identifier of the resource within its kind.
    fn resource_uid(&self) -> &str;
}

/// A resource as the engine sees it: a kind, a uid and an opaque document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    kind: String,
    uid: String,
    document: Map<String, Value>,
}

impl Resource {
    /// Wrap a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` when kind or uid is empty or the document is
    /// not a JSON object.
    pub fn new(kind: impl Into<String>, uid: impl Into<String>, document: Value) -> Result<Self> {
        let kind = kind.into();
        let uid = uid.into();
        validate_identity(&kind, &uid)?;

        match document {
            Value::Object(document) => Ok(Self {
                kind,
                uid,
                document,
            }),
            other => Err(Error::invalid_resource(format!(
                "document for {kind}/{uid} must be an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Create a resource with an empty document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` when kind or uid is empty.
    pub fn empty(kind: impl Into<String>, uid: impl Into<String>) -> Result<Self> {
        Self::new(kind, uid, Value::Object(Map::new()))
    }

    /// Encode a concrete resource type into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `EncodeFailed` if the value does not serialize, or
    /// `InvalidResource` if it does not serialize to an object.
    pub fn from_typed<T: Serialize>(
        kind: impl Into<String>,
        uid: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        let document = serde_json::to_value(value).map_err(|e| Error::encode_failed(e.to_string()))?;
        Self::new(kind, uid, document)
    }

    /// Decode the whole document into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailed` if the document does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.document.clone()))
            .map_err(|e| Error::decode_failed(&self.kind, &self.uid, e.to_string()))
    }

    /// The resource kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The resource uid.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The raw document.
    pub const fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Mutable access to the raw document.
    pub const fn document_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.document
    }

    /// The desired-state subtree, if any.
    pub fn spec(&self) -> Option<&Value> {
        self.document.get(SPEC_FIELD)
    }

    /// The observed-state subtree, if any.
    pub fn status(&self) -> Option<&Value> {
        self.document.get(STATUS_FIELD)
    }

    /// Replace the status subtree. `None` removes it.
    pub fn set_status(&mut self, status: Option<Value>) {
        match status {
            Some(status) => {
                self.document.insert(STATUS_FIELD.to_string(), status);
            }
            None => {
                self.document.remove(STATUS_FIELD);
            }
        }
    }

    /// Edit the status subtree in place. A missing or non-object status is
    /// replaced with an empty object first.
    pub fn update_status<R>(&mut self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        with_object(&mut self.document, STATUS_FIELD, f)
    }

    /// Decode the status subtree into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailed` if the status does not match `T`.
    pub fn decode_status<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.status()
            .map(|status| {
                serde_json::from_value(status.clone())
                    .map_err(|e| Error::decode_failed(&self.kind, &self.uid, e.to_string()))
            })
            .transpose()
    }

    /// Encode a concrete status type into the status subtree.
    ///
    /// # Errors
    ///
    /// Returns `EncodeFailed` if the value does not serialize.
    pub fn set_status_typed<T: Serialize>(&mut self, status: &T) -> Result<()> {
        let value = serde_json::to_value(status).map_err(|e| Error::encode_failed(e.to_string()))?;
        self.set_status(Some(value));
        Ok(())
    }

    /// Last modification time recorded in `metadata.updatedAt`.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.document
            .get(METADATA_FIELD)
            .and_then(|metadata| metadata.get(UPDATED_AT_FIELD))
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Record a modification time in `metadata.updatedAt`.
    pub fn set_updated_at(&mut self, timestamp: DateTime<Utc>) {
        with_object(&mut self.document, METADATA_FIELD, |metadata| {
            metadata.insert(
                UPDATED_AT_FIELD.to_string(),
                Value::String(timestamp.to_rfc3339()),
            );
        });
    }

    /// Conditions stored under `status.conditions`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailed` if the stored conditions are malformed.
    pub fn conditions(&self) -> Result<Vec<Condition>> {
        self.status()
            .and_then(|status| status.get(CONDITIONS_FIELD))
            .map_or_else(
                || Ok(Vec::new()),
                |raw| {
                    serde_json::from_value(raw.clone())
                        .map_err(|e| Error::decode_failed(&self.kind, &self.uid, e.to_string()))
                },
            )
    }

    /// Look up a single condition by type.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailed` if the stored conditions are malformed.
    pub fn condition(&self, condition_type: &str) -> Result<Option<Condition>> {
        Ok(condition::find_condition(&self.conditions()?, condition_type).cloned())
    }

    /// Set a condition at the current time. See [`condition::set_condition`].
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailed`/`EncodeFailed` if the condition list cannot be
    /// read or written back.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Result<ConditionTransition> {
        self.set_condition_at(condition_type, status, reason, message, Utc::now())
    }

    /// Set a condition with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailed`/`EncodeFailed` if the condition list cannot be
    /// read or written back.
    pub fn set_condition_at(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<ConditionTransition> {
        let mut conditions = self.conditions()?;
        let transition =
            condition::set_condition(&mut conditions, condition_type, status, reason, message, now);

        if transition != ConditionTransition::Unchanged {
            let encoded =
                serde_json::to_value(&conditions).map_err(|e| Error::encode_failed(e.to_string()))?;
            self.update_status(|status| status.insert(CONDITIONS_FIELD.to_string(), encoded));
        }

        Ok(transition)
    }
}

impl ResourceRef for Resource {
    fn resource_kind(&self) -> &str {
        &self.kind
    }

    fn resource_uid(&self) -> &str {
        &self.uid
    }
}

fn validate_identity(kind: &str, uid: &str) -> Result<()> {
    if kind.trim().is_empty() {
        return Err(Error::invalid_resource("resource kind must not be empty"));
    }
    if uid.trim().is_empty() {
        return Err(Error::invalid_resource(format!(
            "resource uid must not be empty (kind {kind})"
        )));
    }
    Ok(())
}

/// Run `f` against `map[key]` as an object; non-object values are discarded.
fn with_object<R>(
    map: &mut Map<String, Value>,
    key: &str,
    f: impl FnOnce(&mut Map<String, Value>) -> R,
) -> R {
    let mut object = match map.remove(key) {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    };
    let result = f(&mut object);
    map.insert(key.to_string(), Value::Object(object));
    result
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
