//! In-process event routing for converge.
//!
//! This crate provides the publish/subscribe layer that triggers
//! reconciliation. Key features:
//!
//! - **Event**: immutable envelope with a dot-delimited type and string extensions
//! - **Patterns**: `*` matches one segment, `**` matches the rest
//! - **Event bus**: non-blocking publish, pooled dispatch, isolated handlers
//! - **Naming**: `<prefix>.<kind>.<action>` and `<conditionPrefix>.<type>`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use converge_events::{Event, EventBus, InMemoryEventBus, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> converge_events::Result<()> {
//!     let bus = InMemoryEventBus::with_defaults()?;
//!
//!     bus.subscribe("svc.device.*", handler_fn(|event: Arc<Event>| async move {
//!         println!("received {}", event.event_type());
//!         Ok(())
//!     }))
//!     .await?;
//!
//!     bus.publish(Event::for_resource("svc.device.created", "api", "Device", "dev-1", "created"))?;
//!     bus.close().await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod naming;
pub mod pattern;

pub use bus::{
    EventBus, EventBusBuilder, EventBusConfig, EventHandler, FnHandler, InMemoryEventBus,
    SubscriptionId, handler_fn,
};
pub use error::{Error, Result};
pub use event::{EXT_ACTION, EXT_RESOURCE_KIND, EXT_RESOURCE_UID, Event, EventId};
pub use naming::{EventNaming, ResourceAction};
pub use pattern::EventPattern;
