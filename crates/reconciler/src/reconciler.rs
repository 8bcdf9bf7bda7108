//! Reconciler contract and shared helpers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use converge_core::{Condition, ConditionStatus, ConditionTransition, Resource, ResourceRef, Storage};
use converge_events::{Event, EventBus, EventNaming, ResourceAction};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::ReconcileResult;

/// Drives one resource kind toward its desired state.
///
/// `reconcile` is called with the freshly loaded resource and must be
/// idempotent: it can run any number of times for the same input.
/// Returning an error schedules a retry; returning
/// [`ReconcileResult::done`] ends the chain.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The kind this reconciler owns.
    fn resource_kind(&self) -> &str;

    /// Run one reconcile pass.
    async fn reconcile(&self, resource: Resource) -> Result<ReconcileResult>;
}

/// Status persistence, event emission and condition helpers.
///
/// Embed one in a concrete reconciler.
#[derive(Clone)]
pub struct BaseReconciler {
    storage: Arc<dyn Storage>,
    bus: Arc<dyn EventBus>,
    naming: EventNaming,
    source: String,
}

impl BaseReconciler {
    /// Create the helper set.
    pub fn new(
        storage: Arc<dyn Storage>,
        bus: Arc<dyn EventBus>,
        naming: EventNaming,
        source: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            bus,
            naming,
            source: source.into(),
        }
    }

    /// Get the storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Get the event bus.
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Get the naming convention.
    pub const fn naming(&self) -> &EventNaming {
        &self.naming
    }

    /// Get the event source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Persist the status of `resource` without clobbering anything else.
    ///
    /// Reloads the stored copy, replaces only its `status`, stamps
    /// `metadata.updatedAt` and saves it. Spec edits made since `resource`
    /// was loaded survive. Returns the merged copy.
    ///
    /// # Errors
    ///
    /// Returns a storage `NotFound` if the resource was deleted meanwhile;
    /// it is not recreated.
    pub async fn update_status(&self, resource: &Resource) -> Result<Resource> {
        let mut latest = self.storage.load(resource.kind(), resource.uid()).await?;
        latest.set_status(resource.status().cloned());
        latest.set_updated_at(Utc::now());
        self.storage.save(&latest).await?;

        debug!(
            kind = %latest.kind(),
            uid = %latest.uid(),
            "Status updated"
        );
        Ok(latest)
    }

    /// Publish `event_type` about `resource`.
    ///
    /// The `action` extension is the last segment of the event type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` if the kind or uid is empty, or the bus
    /// error if publishing fails.
    pub fn emit_event(&self, event_type: &str, resource: &(impl ResourceRef + ?Sized)) -> Result<()> {
        self.publish_about(event_type, resource, serde_json::Value::Null)
    }

    /// Publish `<prefix>.<kind>.<action>` carrying the resource document.
    ///
    /// # Errors
    ///
    /// Same as [`emit_event`](Self::emit_event).
    pub fn emit_resource_event(&self, resource: &Resource, action: ResourceAction) -> Result<()> {
        let event_type = self.naming.resource_event(resource.kind(), action);
        let payload = serde_json::Value::Object(resource.document().clone());
        self.publish_about(&event_type, resource, payload)
    }

    /// Publish `<conditionPrefix>.<type>` carrying the condition.
    ///
    /// # Errors
    ///
    /// Same as [`emit_event`](Self::emit_event), plus `InvalidResource` if
    /// the condition cannot be encoded.
    pub fn emit_condition_event(&self, resource: &Resource, condition: &Condition) -> Result<()> {
        let event_type = self.naming.condition_event(&condition.condition_type);
        let payload = serde_json::to_value(condition)
            .map_err(|e| Error::invalid_resource(format!("condition not encodable: {e}")))?;
        self.publish_about(&event_type, resource, payload)
    }

    /// Set a condition on the in-hand resource. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if `status.conditions` is malformed.
    pub fn set_condition(
        &self,
        resource: &mut Resource,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Result<ConditionTransition> {
        Ok(resource.set_condition(condition_type, status, reason, message)?)
    }

    /// Set a condition and publish a condition event if its status moved.
    ///
    /// # Errors
    ///
    /// Same as [`set_condition`](Self::set_condition) and
    /// [`emit_condition_event`](Self::emit_condition_event).
    pub fn set_condition_and_notify(
        &self,
        resource: &mut Resource,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Result<ConditionTransition> {
        let transition = self.set_condition(resource, condition_type, status, reason, message)?;
        if !transition.is_transition() {
            return Ok(transition);
        }
        if let Some(condition) = self.condition(resource, condition_type)? {
            self.emit_condition_event(resource, &condition)?;
        }
        Ok(transition)
    }

    /// Look up a condition by type.
    ///
    /// # Errors
    ///
    /// Returns a storage error if `status.conditions` is malformed.
    pub fn condition(&self, resource: &Resource, condition_type: &str) -> Result<Option<Condition>> {
        Ok(resource.condition(condition_type)?)
    }

    fn publish_about(
        &self,
        event_type: &str,
        resource: &(impl ResourceRef + ?Sized),
        payload: serde_json::Value,
    ) -> Result<()> {
        let kind = resource.resource_kind();
        let uid = resource.resource_uid();
        if kind.is_empty() || uid.is_empty() {
            return Err(Error::invalid_resource(format!(
                "cannot emit '{event_type}' without kind and uid"
            )));
        }

        let action = event_type.rsplit('.').next().unwrap_or(event_type);
        let event = Event::for_resource(event_type, self.source.as_str(), kind, uid, action)
            .with_payload(payload);
        self.bus.publish(event)?;

        debug!(event_type, kind, uid, "Event emitted");
        Ok(())
    }
}
