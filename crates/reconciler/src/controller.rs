//! Event-driven controller.
//!
//! The controller owns a rate-limited work queue of [`ReconcileRequest`]s
//! and a pool of workers draining it. Events matching the configured pattern
//! that name a resource of a registered kind become requests; each worker
//! loads the resource, hands it to the reconciler for its kind and schedules
//! the next pass from the outcome.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use converge_core::{ResultExt, Storage};
use converge_events::{Event, EventBus, EventHandler, EventPattern, SubscriptionId};
use futures::FutureExt;
use futures::future::join_all;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::rate_limit::{ExponentialBackoff, RateLimiter, RateLimitingQueue};
use crate::reconciler::Reconciler;
use crate::types::{RESYNC_REASON, ReconcileRequest};

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 2;
/// Default first retry delay after a failed reconcile.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Default retry delay ceiling.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(300);
/// Default idle time after which failure counts are dropped.
pub const DEFAULT_BACKOFF_MAX_AGE: Duration = Duration::from_secs(3600);
/// Default subscription pattern.
pub const DEFAULT_EVENT_PATTERN: &str = "**";

/// Configuration for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of concurrent workers.
    pub workers: usize,

    /// First retry delay after a failed reconcile, in milliseconds.
    #[serde(with = "duration_ms")]
    pub default_retry_delay: Duration,

    /// Ceiling for the exponential retry delay, in milliseconds.
    #[serde(with = "duration_ms")]
    pub max_retry_delay: Duration,

    /// Failure history idle longer than this is dropped, in milliseconds.
    #[serde(with = "duration_ms")]
    pub backoff_max_age: Duration,

    /// Period of the full resync, in milliseconds. Disabled when absent.
    #[serde(with = "duration_ms::option", skip_serializing_if = "Option::is_none")]
    pub resync_interval: Option<Duration>,

    /// Pattern the controller subscribes with.
    pub event_pattern: String,

    /// Re-run an item that was triggered while it was being reconciled.
    pub rerun_on_done: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            default_retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            backoff_max_age: DEFAULT_BACKOFF_MAX_AGE,
            resync_interval: None,
            event_pattern: DEFAULT_EVENT_PATTERN.to_string(),
            rerun_on_done: false,
        }
    }
}

impl ControllerConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the base and maximum retry delay.
    #[must_use]
    pub const fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.default_retry_delay = base;
        self.max_retry_delay = max;
        self
    }

    /// Enable the periodic resync.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    /// Set the subscription pattern.
    #[must_use]
    pub fn with_event_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.event_pattern = pattern.into();
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero workers, a zero retry delay, a zero
    /// resync interval or an unparsable event pattern.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.default_retry_delay.is_zero() {
            return Err(Error::invalid_config("default_retry_delay must be positive"));
        }
        if self.resync_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::invalid_config("resync_interval must be positive"));
        }
        EventPattern::parse(&self.event_pattern)
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        Ok(())
    }
}

/// What a worker schedules once an item is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextPass {
    None,
    Now,
    After(Duration),
    RateLimited,
}

struct Shared {
    bus: Arc<dyn EventBus>,
    storage: Arc<dyn Storage>,
    config: ControllerConfig,
    reconcilers: RwLock<HashMap<String, Arc<dyn Reconciler>>>,
    queue: RateLimitingQueue<ReconcileRequest>,
    stopping: watch::Sender<bool>,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    subscription: Option<SubscriptionId>,
    tasks: Vec<JoinHandle<()>>,
}

/// Routes events to reconcilers through a deduplicating work queue.
pub struct Controller {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Controller {
    /// Create a controller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(
        bus: Arc<dyn EventBus>,
        storage: Arc<dyn Storage>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let queue = if config.rerun_on_done {
            WorkQueue::with_rerun_on_done()
        } else {
            WorkQueue::new()
        };
        let limiter: Arc<dyn RateLimiter<ReconcileRequest>> = Arc::new(ExponentialBackoff::new(
            config.default_retry_delay,
            config.max_retry_delay,
            config.backoff_max_age,
        ));
        let (stopping, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                bus,
                storage,
                config,
                reconcilers: RwLock::new(HashMap::new()),
                queue: RateLimitingQueue::new(queue, limiter),
                stopping,
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Register the reconciler for its kind.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateReconciler` if the kind already has one.
    pub async fn register_reconciler(&self, reconciler: Arc<dyn Reconciler>) -> Result<()> {
        let kind = reconciler.resource_kind().to_string();
        let mut reconcilers = self.shared.reconcilers.write().await;
        if reconcilers.contains_key(&kind) {
            return Err(Error::duplicate_reconciler(kind));
        }

        info!(kind = %kind, "Reconciler registered");
        reconcilers.insert(kind, reconciler);
        Ok(())
    }

    /// Registered kinds in sorted order.
    pub async fn registered_kinds(&self) -> Vec<String> {
        self.shared.reconcilers.read().await.keys().cloned().sorted().collect()
    }

    /// Subscribe to the bus and spawn the workers and the resync loop.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` on a second call, `Stopped` once `stop` has
    /// run, or the bus error if the subscription fails.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.started {
            return Err(Error::AlreadyStarted);
        }
        if self.shared.queue.is_shutting_down() {
            return Err(Error::Stopped);
        }

        let handler = Arc::new(ControllerHandler {
            shared: Arc::downgrade(&self.shared),
        });
        let subscription = self
            .shared
            .bus
            .subscribe(&self.shared.config.event_pattern, handler)
            .await?;

        lifecycle.started = true;
        lifecycle.subscription = Some(subscription);
        lifecycle.tasks = (0..self.shared.config.workers)
            .map(|worker| tokio::spawn(run_worker(Arc::clone(&self.shared), worker)))
            .collect();

        if let Some(interval) = self.shared.config.resync_interval {
            lifecycle
                .tasks
                .push(tokio::spawn(run_resync(Arc::clone(&self.shared), interval)));
        }

        info!(
            workers = self.shared.config.workers,
            pattern = %self.shared.config.event_pattern,
            resync_ms = self.shared.config.resync_interval.map(|d| d.as_millis()),
            "Controller started"
        );
        Ok(())
    }

    /// Unsubscribe, shut the queue down and wait for every task to finish.
    ///
    /// Calling it more than once is harmless. A stopped controller cannot be
    /// started again.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(subscription) = lifecycle.subscription.take() {
            if let Err(e) = self.shared.bus.unsubscribe(subscription).await {
                debug!(error = %e, "Subscription already released");
            }
        }

        self.shared.queue.shut_down();
        self.shared.stopping.send_replace(true);

        let tasks = std::mem::take(&mut lifecycle.tasks);
        if tasks.is_empty() {
            return;
        }

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Controller task failed");
            }
        }
        info!("Controller stopped");
    }

    /// Trigger a reconcile by hand. Returns `true` if it was queued.
    pub fn enqueue(&self, request: ReconcileRequest) -> bool {
        self.shared.queue.add(request)
    }

    /// Reconcile `request` once on the caller's task and schedule any
    /// follow-up pass on the queue. Bypasses the in-flight set.
    #[cfg(test)]
    async fn process_request(&self, request: &ReconcileRequest) {
        let next = self.shared.process_request(request).await;
        self.shared.schedule(request.clone(), next);
    }

    /// Turn an event into a request, if it names a resource of a
    /// registered kind.
    pub async fn handle_event(&self, event: &Event) {
        self.shared.handle_event(event).await;
    }

    /// Enqueue every stored resource of every registered kind.
    pub async fn resync(&self) {
        self.shared.resync().await;
    }

    /// Number of requests waiting for a worker.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Consecutive failures recorded for `request`.
    pub fn num_requeues(&self, request: &ReconcileRequest) -> u32 {
        self.shared.queue.num_requeues(request)
    }

    /// Get the configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }
}

impl Shared {
    async fn reconciler_for(&self, kind: &str) -> Option<Arc<dyn Reconciler>> {
        self.reconcilers.read().await.get(kind).cloned()
    }

    async fn handle_event(&self, event: &Event) {
        let Some(request) = ReconcileRequest::from_event(event) else {
            debug!(event_type = %event.event_type(), "Event names no resource; ignored");
            return;
        };
        if self.reconciler_for(&request.resource_kind).await.is_none() {
            debug!(
                event_type = %event.event_type(),
                kind = %request.resource_kind,
                "No reconciler for kind; ignored"
            );
            return;
        }

        let key = request.to_string();
        if self.queue.add(request) {
            debug!(request = %key, event_type = %event.event_type(), "Reconcile queued");
        } else {
            debug!(request = %key, "Reconcile already queued or in flight");
        }
    }

    async fn process_request(&self, request: &ReconcileRequest) -> NextPass {
        let Some(reconciler) = self.reconciler_for(&request.resource_kind).await else {
            debug!(request = %request, "No reconciler for kind; skipped");
            return NextPass::None;
        };

        let resource = match self
            .storage
            .load(&request.resource_kind, &request.resource_uid)
            .await
        {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                self.queue.forget(request);
                debug!(request = %request, "Resource gone; skipped");
                return NextPass::None;
            }
            Err(e) => {
                warn!(request = %request, error = %e, "Failed to load resource");
                return NextPass::RateLimited;
            }
        };

        debug!(request = %request, reason = %request.reason, "Reconciling");
        let outcome = AssertUnwindSafe(reconciler.reconcile(resource))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                self.queue.forget(request);
                if !result.requeue_after.is_zero() {
                    NextPass::After(result.requeue_after)
                } else if result.requeue {
                    NextPass::Now
                } else {
                    NextPass::None
                }
            }
            Ok(Err(e)) => {
                let attempts = self.queue.num_requeues(request);
                if let Some(delay) = e.retry_after().filter(|d| !d.is_zero()) {
                    warn!(
                        request = %request,
                        error = %e,
                        retry_ms = delay.as_millis(),
                        "Reconcile failed"
                    );
                    NextPass::After(delay)
                } else {
                    warn!(request = %request, error = %e, attempts, "Reconcile failed; backing off");
                    NextPass::RateLimited
                }
            }
            Err(_) => {
                error!(request = %request, "Reconciler panicked; backing off");
                NextPass::RateLimited
            }
        }
    }

    fn schedule(&self, request: ReconcileRequest, next: NextPass) {
        match next {
            NextPass::None => {}
            NextPass::Now => {
                self.queue.add(request);
            }
            NextPass::After(delay) => self.queue.add_after(request, delay),
            NextPass::RateLimited => {
                let delay = self.queue.add_rate_limited(request);
                debug!(retry_ms = delay.as_millis(), "Retry scheduled");
            }
        }
    }

    async fn resync(&self) {
        let kinds: Vec<String> = self.reconcilers.read().await.keys().cloned().collect();
        for kind in kinds {
            let Some(resources) = self.storage.list(&kind).await.into_option_logged("resync list")
            else {
                continue;
            };
            let queued = resources
                .iter()
                .filter(|r| self.queue.add(ReconcileRequest::for_resource(*r, RESYNC_REASON)))
                .count();
            debug!(kind = %kind, total = resources.len(), queued, "Resync");
        }
    }
}

async fn run_worker(shared: Arc<Shared>, worker: usize) {
    debug!(worker, "Worker started");
    while let Some(request) = shared.queue.get().await {
        let next = shared.process_request(&request).await;
        // Release the in-flight marker first so a requeue is not deduplicated.
        shared.queue.done(&request);
        shared.schedule(request, next);
    }
    debug!(worker, "Worker stopped");
}

async fn run_resync(shared: Arc<Shared>, period: Duration) {
    let mut stopping = shared.stopping.subscribe();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => shared.resync().await,
            () = async {
                let _ = stopping.wait_for(|stopping| *stopping).await;
            } => break,
        }
    }
    debug!("Resync loop stopped");
}

/// Bus subscription feeding the controller.
///
/// Holds a weak reference so the bus does not keep a dropped controller alive.
struct ControllerHandler {
    shared: Weak<Shared>,
}

#[async_trait]
impl EventHandler for ControllerHandler {
    async fn handle(&self, event: Arc<Event>) -> converge_events::Result<()> {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_event(&event).await;
        }
        Ok(())
    }
}

/// Serialization helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
