//! Kubernetes-style reconciliation for converge resources.
//!
//! Events say *that* something changed; reconcilers decide *what* to do by
//! comparing a resource's spec with its status. The pieces:
//!
//! - **Work queue**: deduplicates requests per resource and never hands one
//!   resource to two workers at once
//! - **Rate limiting**: per-resource exponential retry backoff
//! - **Controller**: subscribes to the bus, feeds the queue, runs workers
//!   and an optional periodic resync
//! - **Base reconciler**: merge-on-write status updates, event emission and
//!   conditions
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use converge_core::InMemoryStorage;
//! use converge_events::InMemoryEventBus;
//! use converge_reconciler::{Controller, ControllerConfig};
//!
//! #[tokio::main]
//! async fn main() -> converge_reconciler::Result<()> {
//!     let bus = Arc::new(InMemoryEventBus::with_defaults()?);
//!     let storage = InMemoryStorage::new_arc();
//!
//!     let controller = Controller::new(bus, storage, ControllerConfig::default())?;
//!     controller.register_reconciler(Arc::new(DeviceReconciler::new())).await?;
//!     controller.start().await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     controller.stop().await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use controller::{Controller, ControllerConfig};
pub use error::{Error, Result};
pub use queue::WorkQueue;
pub use rate_limit::{ExponentialBackoff, RateLimiter, RateLimitingQueue, calculate_backoff};
pub use reconciler::{BaseReconciler, Reconciler};
pub use types::{MANUAL_REASON, RESYNC_REASON, ReconcileRequest, ReconcileResult};
