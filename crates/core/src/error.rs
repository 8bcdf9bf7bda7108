//! Core error types for resource and storage operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Core error type for resource and storage operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Storage errors
    #[error("resource {kind}/{uid} not found")]
    NotFound { kind: String, uid: String },

    #[error("storage operation '{operation}' failed: {reason}")]
    StorageFailed { operation: String, reason: String },

    // Envelope errors
    #[error("invalid resource: {reason}")]
    InvalidResource { reason: String },

    #[error("failed to decode resource {kind}/{uid}: {reason}")]
    DecodeFailed {
        kind: String,
        uid: String,
        reason: String,
    },

    #[error("failed to encode resource: {reason}")]
    EncodeFailed { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            uid: uid.into(),
        }
    }

    /// Create a storage failed error.
    pub fn storage_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid resource error.
    pub fn invalid_resource(reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
        }
    }

    /// Create a decode failed error.
    pub fn decode_failed(
        kind: impl Into<String>,
        uid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DecodeFailed {
            kind: kind.into(),
            uid: uid.into(),
            reason: reason.into(),
        }
    }

    /// Create an encode failed error.
    pub fn encode_failed(reason: impl Into<String>) -> Self {
        Self::EncodeFailed {
            reason: reason.into(),
        }
    }

    /// Whether this error means the resource does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
