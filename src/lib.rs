//! # converge
//!
//! Event-driven reconciliation: an in-process event bus with hierarchical
//! subscriptions feeds a deduplicating work queue, and a controller drives
//! registered reconcilers until each resource's status matches its spec.
//!
//! This library re-exports the workspace crates and holds the runtime
//! wiring shared by the binary.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub use converge_core;
pub use converge_events;
pub use converge_reconciler;

pub mod cli;
pub mod config;
pub mod runtime;
pub mod telemetry;

pub use config::{ConfigError, RuntimeConfig};
pub use runtime::Runtime;
