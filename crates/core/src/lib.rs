//! Core types shared by the converge crates.
//!
//! - **Resource**: a kind-tagged envelope around an opaque JSON document
//! - **Condition**: tri-state, timestamped status flags kept in `status.conditions`
//! - **Storage**: the load/save contract the controller and reconcilers use

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod condition;
pub mod error;
pub mod resource;
pub mod result;
pub mod storage;

pub use condition::{Condition, ConditionStatus, ConditionTransition};
pub use error::{Error, Result};
pub use resource::{Resource, ResourceRef};
pub use result::ResultExt;
pub use storage::{InMemoryStorage, Storage, TracingStorage};
