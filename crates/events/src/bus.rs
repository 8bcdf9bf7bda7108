//! Event bus for pub/sub coordination.
//!
//! Publishing never blocks: events go into a bounded buffer and a fixed pool
//! of dispatch workers fans them out. Every matching handler runs as its own
//! detached task, so a slow, failing or panicking handler cannot hold up the
//! publisher, its siblings, or the dispatch loop.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::pattern::EventPattern;

/// Default capacity of the dispatch buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;
/// Default number of dispatch workers.
pub const DEFAULT_DISPATCH_WORKERS: usize = 4;

/// Identifier returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Receives events matching a subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Errors are logged by the bus and never retried.
    async fn handle(&self, event: Arc<Event>) -> Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        (self.f)(event).await
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Publish/subscribe contract. Implementations may be swapped (for a durable
/// or distributed variant) without touching the controller.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Enqueue an event for asynchronous dispatch.
    ///
    /// Fails immediately with `BufferFull` or `Closed`; never waits.
    fn publish(&self, event: Event) -> Result<()>;

    /// Register a handler for every event whose type matches `pattern`.
    async fn subscribe(&self, pattern: &str, handler: Arc<dyn EventHandler>)
    -> Result<SubscriptionId>;

    /// Remove a subscription.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Stop accepting events, drain the buffer, and wait for dispatch workers.
    async fn close(&self);
}

/// Configuration for [`InMemoryEventBus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Capacity of the dispatch buffer.
    pub buffer_size: usize,
    /// Number of dispatch workers.
    pub dispatch_workers: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
        }
    }
}

impl EventBusConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero buffer size or worker count.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::invalid_config("buffer_size must be at least 1"));
        }
        if self.dispatch_workers == 0 {
            return Err(Error::invalid_config("dispatch_workers must be at least 1"));
        }
        Ok(())
    }
}

struct Subscriber {
    pattern: EventPattern,
    handler: Arc<dyn EventHandler>,
}

type Subscribers = Arc<RwLock<HashMap<SubscriptionId, Subscriber>>>;

/// In-memory event bus. Events are lost on restart.
pub struct InMemoryEventBus {
    /// `None` once the bus is closed.
    sender: std::sync::Mutex<Option<mpsc::Sender<Event>>>,
    subscribers: Subscribers,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a bus and start its dispatch workers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is invalid or no Tokio
    /// runtime is running.
    pub fn new(config: EventBusConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::invalid_config(format!("event bus needs a Tokio runtime: {e}")))?;

        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let receiver = Arc::new(Mutex::new(receiver));
        let subscribers: Subscribers = Arc::new(RwLock::new(HashMap::new()));

        let workers = (0..config.dispatch_workers)
            .map(|worker| {
                runtime.spawn(dispatch_loop(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&subscribers),
                ))
            })
            .collect();

        debug!(
            buffer_size = config.buffer_size,
            dispatch_workers = config.dispatch_workers,
            "Event bus started"
        );

        Ok(Self {
            sender: std::sync::Mutex::new(Some(sender)),
            subscribers,
            workers: Mutex::new(workers),
            next_id: AtomicU64::new(0),
            capacity: config.buffer_size,
        })
    }

    /// Create a bus with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no Tokio runtime is running.
    pub fn with_defaults() -> Result<Self> {
        Self::new(EventBusConfig::default())
    }

    /// Capacity of the dispatch buffer.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn sender(&self) -> Option<mpsc::Sender<Event>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn publish(&self, event: Event) -> Result<()> {
        event.validate()?;
        let sender = self.sender().ok_or(Error::Closed)?;

        trace!(
            event_id = %event.id(),
            event_type = event.event_type(),
            "Publishing event"
        );

        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                warn!(
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    capacity = self.capacity,
                    "Event buffer full, rejecting publish"
                );
                Error::buffer_full(self.capacity)
            }
            TrySendError::Closed(_) => Error::Closed,
        })
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let pattern = EventPattern::parse(pattern)?;
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = %id, pattern = %pattern, "Subscribed");

        self.subscribers
            .write()
            .await
            .insert(id, Subscriber { pattern, handler });

        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.subscribers.write().await.remove(&id).is_none() {
            return Err(Error::subscription_not_found(id));
        }
        debug!(subscription = %id, "Unsubscribed");
        Ok(())
    }

    async fn close(&self) {
        // Dropping the last sender lets workers drain the buffer and exit.
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Dispatch worker terminated abnormally");
            }
        }

        self.subscribers.write().await.clear();
        info!("Event bus closed");
    }
}

async fn dispatch_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Event>>>,
    subscribers: Subscribers,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(event) = next else {
            break;
        };
        dispatch(worker, Arc::new(event), &subscribers).await;
    }
    debug!(worker, "Dispatch worker stopped");
}

async fn dispatch(worker: usize, event: Arc<Event>, subscribers: &Subscribers) {
    let handlers: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = subscribers
        .read()
        .await
        .iter()
        .filter(|(_, sub)| sub.pattern.matches(event.event_type()))
        .map(|(id, sub)| (*id, Arc::clone(&sub.handler)))
        .collect();

    trace!(
        worker,
        event_id = %event.id(),
        event_type = event.event_type(),
        handlers = handlers.len(),
        "Dispatching event"
    );

    for (id, handler) in handlers {
        let event = Arc::clone(&event);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&event)))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    subscription = %id,
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    error = %e,
                    "Event handler failed"
                ),
                Err(_) => error!(
                    subscription = %id,
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    "Event handler panicked"
                ),
            }
        });
    }
}

/// Builder for [`InMemoryEventBus`].
pub struct EventBusBuilder {
    config: EventBusConfig,
}

impl EventBusBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: EventBusConfig::default(),
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the dispatch buffer capacity.
    #[must_use]
    pub const fn with_buffer_size(mut self, capacity: usize) -> Self {
        self.config.buffer_size = capacity;
        self
    }

    /// Set the number of dispatch workers.
    #[must_use]
    pub const fn with_dispatch_workers(mut self, workers: usize) -> Self {
        self.config.dispatch_workers = workers;
        self
    }

    /// Build the event bus.
    ///
    /// # Errors
    ///
    /// See [`InMemoryEventBus::new`].
    pub fn build(self) -> Result<InMemoryEventBus> {
        InMemoryEventBus::new(self.config)
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
