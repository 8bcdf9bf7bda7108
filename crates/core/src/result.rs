//! Extension traits for Results that should degrade to logging instead of failing.

use crate::error::Error;

/// Extension trait providing logged fallbacks for Results.
///
/// Background loops such as resync cannot propagate errors to a caller,
/// so they log and move on.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, Error> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, context, "Operation failed");
                None
            }
        }
    }
}
