//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A reconcile pass failed. `retry_after` overrides the backoff delay.
    #[error("reconciliation failed: {reason}")]
    ReconcileFailed {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// A reconciler for this kind is already registered.
    #[error("reconciler for kind '{kind}' already registered")]
    DuplicateReconciler { kind: String },

    /// The controller was started twice.
    #[error("controller already started")]
    AlreadyStarted,

    /// The controller was stopped and cannot be started again.
    #[error("controller stopped")]
    Stopped,

    /// Invalid controller configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The resource cannot be addressed or published about.
    #[error("invalid resource: {reason}")]
    InvalidResource { reason: String },

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] converge_core::Error),

    /// Event bus failure.
    #[error(transparent)]
    Event(#[from] converge_events::Error),
}

impl Error {
    /// Create a reconcile failed error retried with backoff.
    pub fn reconcile_failed(reason: impl Into<String>) -> Self {
        Self::ReconcileFailed {
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// Ask for a specific retry delay. No effect on other variants.
    #[must_use]
    pub fn with_retry_after(self, delay: Duration) -> Self {
        match self {
            Self::ReconcileFailed { reason, .. } => Self::ReconcileFailed {
                reason,
                retry_after: Some(delay),
            },
            other => other,
        }
    }

    /// Delay requested by the error, if any.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ReconcileFailed { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Create a duplicate reconciler error.
    pub fn duplicate_reconciler(kind: impl Into<String>) -> Self {
        Self::DuplicateReconciler { kind: kind.into() }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid resource error.
    pub fn invalid_resource(reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
        }
    }

    /// Whether this wraps a storage `NotFound`.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }
}
