//! Core types for the reconciler.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use converge_core::ResourceRef;
use converge_events::Event;
use serde::{Deserialize, Serialize};

/// Reason attached to requests produced by the periodic resync.
pub const RESYNC_REASON: &str = "resync";

/// Reason attached to requests enqueued by hand.
pub const MANUAL_REASON: &str = "manual";

/// A unit of work: "look at this resource again".
///
/// Identity is `(resource_kind, resource_uid)`. Two requests for the same
/// resource with different reasons are equal, so the queue keeps at most
/// one of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub resource_kind: String,
    pub resource_uid: String,
    /// Informational; ignored by equality and hashing.
    pub reason: String,
}

impl ReconcileRequest {
    /// Create a request.
    pub fn new(
        resource_kind: impl Into<String>,
        resource_uid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            resource_uid: resource_uid.into(),
            reason: reason.into(),
        }
    }

    /// Build a request from an event carrying the resource extensions.
    ///
    /// Returns `None` if either `resourceKind` or `resourceUID` is missing.
    pub fn from_event(event: &Event) -> Option<Self> {
        let kind = event.resource_kind()?;
        let uid = event.resource_uid()?;
        Some(Self::new(kind, uid, format!("event: {}", event.event_type())))
    }

    /// Request for an existing resource.
    pub fn for_resource(resource: &(impl ResourceRef + ?Sized), reason: impl Into<String>) -> Self {
        Self::new(resource.resource_kind(), resource.resource_uid(), reason)
    }
}

impl PartialEq for ReconcileRequest {
    fn eq(&self, other: &Self) -> bool {
        self.resource_kind == other.resource_kind && self.resource_uid == other.resource_uid
    }
}

impl Eq for ReconcileRequest {}

impl Hash for ReconcileRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_kind.hash(state);
        self.resource_uid.hash(state);
    }
}

impl ResourceRef for ReconcileRequest {
    fn resource_kind(&self) -> &str {
        &self.resource_kind
    }

    fn resource_uid(&self) -> &str {
        &self.resource_uid
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_kind, self.resource_uid)
    }
}

/// What a reconciler wants to happen next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Run again immediately.
    pub requeue: bool,
    /// Run again after this delay. Takes precedence over `requeue` when non-zero.
    pub requeue_after: Duration,
}

impl ReconcileResult {
    /// Converged; nothing to schedule.
    pub const fn done() -> Self {
        Self {
            requeue: false,
            requeue_after: Duration::ZERO,
        }
    }

    /// Run again as soon as possible.
    pub const fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: Duration::ZERO,
        }
    }

    /// Run again after `delay`.
    pub const fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: delay,
        }
    }

    /// Whether nothing further is scheduled.
    pub const fn is_done(&self) -> bool {
        !self.requeue && self.requeue_after.is_zero()
    }
}
