//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event bus error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The dispatch buffer is full; the publisher decides whether to retry.
    #[error("event buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },

    /// The bus has been closed.
    #[error("event bus closed")]
    Closed,

    /// Malformed event.
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// Malformed subscription pattern.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Unknown subscription id.
    #[error("subscription '{id}' not found")]
    SubscriptionNotFound { id: String },

    /// Invalid bus configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A subscriber failed to handle an event.
    #[error("handler failed: {reason}")]
    HandlerFailed { reason: String },
}

impl Error {
    /// Create a buffer full error.
    pub const fn buffer_full(capacity: usize) -> Self {
        Self::BufferFull { capacity }
    }

    /// Create an invalid event error.
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// Create an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a subscription not found error.
    pub fn subscription_not_found(id: impl ToString) -> Self {
        Self::SubscriptionNotFound { id: id.to_string() }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a handler failed error.
    pub fn handler_failed(reason: impl Into<String>) -> Self {
        Self::HandlerFailed {
            reason: reason.into(),
        }
    }
}
