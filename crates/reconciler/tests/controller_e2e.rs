//! End-to-end tests: events published on a real bus drive reconcilers
//! through the controller's queue and workers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use converge_core::{ConditionStatus, InMemoryStorage, Resource, Storage};
use converge_events::{
    Event, EventBus, EventBusBuilder, EventNaming, InMemoryEventBus, ResourceAction, handler_fn,
};
use converge_reconciler::{
    BaseReconciler, Controller, ControllerConfig, Error, ReconcileResult, Reconciler, Result,
};
use serde_json::json;
use tokio::time::Instant;

/// Copies `spec.replicas` into `status.readyReplicas` and marks the
/// device Ready. Optionally fails or requeues on the first pass.
struct DeviceReconciler {
    base: BaseReconciler,
    calls: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    overlaps: AtomicUsize,
    first_pass: Option<ReconcileResult>,
    fail_first: bool,
    work: Duration,
}

impl DeviceReconciler {
    fn new(base: BaseReconciler) -> Self {
        Self {
            base,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            first_pass: None,
            fail_first: false,
            work: Duration::ZERO,
        }
    }

    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl Reconciler for DeviceReconciler {
    fn resource_kind(&self) -> &str {
        "Device"
    }

    async fn reconcile(&self, mut resource: Resource) -> Result<ReconcileResult> {
        let call = {
            let mut calls = self.calls.lock().map_err(|e| Error::reconcile_failed(e.to_string()))?;
            calls.push(Instant::now());
            calls.len()
        };
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(self.work).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if call == 1 && self.fail_first {
            return Err(Error::reconcile_failed("device unreachable"));
        }

        let replicas = resource
            .spec()
            .and_then(|spec| spec.get("replicas"))
            .cloned()
            .unwrap_or(json!(0));
        resource.update_status(|status| status.insert("readyReplicas".to_string(), replicas));
        self.base
            .set_condition(&mut resource, "Ready", ConditionStatus::True, "Synced", "")?;
        let stored = self.base.update_status(&resource).await?;
        self.base.emit_resource_event(&stored, ResourceAction::Updated)?;

        Ok(match (call, self.first_pass) {
            (1, Some(first)) => first,
            _ => ReconcileResult::done(),
        })
    }
}

/// Counts calls for `Sensor` resources and always fails with the given
/// retry delay, if any.
struct SensorReconciler {
    calls: AtomicUsize,
    retry_after: Option<Duration>,
}

impl SensorReconciler {
    fn new(retry_after: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            retry_after,
        })
    }
}

#[async_trait]
impl Reconciler for SensorReconciler {
    fn resource_kind(&self) -> &str {
        "Sensor"
    }

    async fn reconcile(&self, _resource: Resource) -> Result<ReconcileResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.retry_after {
            Some(delay) => Err(Error::reconcile_failed("sensor busy").with_retry_after(delay)),
            None => Ok(ReconcileResult::done()),
        }
    }
}

struct Harness {
    bus: Arc<InMemoryEventBus>,
    storage: Arc<InMemoryStorage>,
    controller: Controller,
}

impl Harness {
    async fn new(config: ControllerConfig) -> Self {
        let bus = Arc::new(
            EventBusBuilder::new()
                .build()
                .expect("bus"),
        );
        let storage = InMemoryStorage::new_arc();
        let device = Resource::new("Device", "dev-1", json!({ "spec": { "replicas": 3 } }))
            .expect("resource");
        assert!(storage.save(&device).await.is_ok());

        // Only listen to the external namespace; our own emitted events
        // must not retrigger reconciles.
        let config = config.with_event_pattern("svc.**");
        let controller = Controller::new(bus.clone(), storage.clone(), config)
            .expect("controller");
        Self {
            bus,
            storage,
            controller,
        }
    }

    fn base(&self) -> BaseReconciler {
        BaseReconciler::new(
            self.storage.clone(),
            self.bus.clone(),
            EventNaming::default(),
            "device-controller",
        )
    }

    async fn register(&self, reconciler: DeviceReconciler) -> Arc<DeviceReconciler> {
        let reconciler = Arc::new(reconciler);
        assert!(self.controller.register_reconciler(reconciler.clone()).await.is_ok());
        reconciler
    }

    fn publish_created(&self) {
        let event = Event::for_resource("svc.device.created", "api", "Device", "dev-1", "created");
        assert!(self.bus.publish(event).is_ok());
    }

    async fn shutdown(&self) {
        self.controller.stop().await;
        self.bus.close().await;
    }
}

async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_reconcile_once_per_resource_event() {
    let harness = Harness::new(ControllerConfig::default()).await;
    let reconciler = harness.register(DeviceReconciler::new(harness.base())).await;
    assert!(harness.controller.start().await.is_ok());

    harness.publish_created();

    assert!(wait_until(Duration::from_secs(2), || reconciler.call_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reconciler.call_count(), 1);

    let stored = harness
        .storage
        .load("Device", "dev-1")
        .await
        .expect("load");
    assert_eq!(stored.status().and_then(|s| s.get("readyReplicas")), Some(&json!(3)));
    assert_eq!(
        stored.condition("Ready").ok().flatten().map(|c| c.status),
        Some(ConditionStatus::True)
    );
    assert!(stored.updated_at().is_some());

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_not_reconcile_kinds_without_reconciler() {
    let harness = Harness::new(ControllerConfig::default()).await;
    let sensors = SensorReconciler::new(None);
    assert!(harness.controller.register_reconciler(sensors.clone()).await.is_ok());
    assert!(harness.controller.start().await.is_ok());

    harness.publish_created();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sensors.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.controller.queue_len(), 0);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_not_overlap_manual_trigger_with_running_reconcile() {
    let harness = Harness::new(ControllerConfig::default()).await;
    let mut device = DeviceReconciler::new(harness.base());
    device.work = Duration::from_millis(100);
    let reconciler = harness.register(device).await;
    assert!(harness.controller.start().await.is_ok());

    let request = converge_reconciler::ReconcileRequest::new("Device", "dev-1", "manual");
    assert!(harness.controller.enqueue(request.clone()));
    assert!(wait_until(Duration::from_secs(1), || reconciler.call_count() == 1).await);

    assert!(!harness.controller.enqueue(request));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(reconciler.call_count(), 1);
    assert_eq!(reconciler.overlaps.load(Ordering::SeqCst), 0);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_back_off_when_error_asks_for_zero_delay() {
    let config = ControllerConfig::default()
        .with_retry_delays(Duration::from_millis(50), Duration::from_millis(50));
    let harness = Harness::new(config).await;
    let sensor = Resource::new("Sensor", "s-1", json!({ "spec": {} })).expect("resource");
    assert!(harness.storage.save(&sensor).await.is_ok());
    let sensors = SensorReconciler::new(Some(Duration::ZERO));
    assert!(harness.controller.register_reconciler(sensors.clone()).await.is_ok());
    assert!(harness.controller.start().await.is_ok());

    let event = Event::for_resource("svc.sensor.created", "api", "Sensor", "s-1", "created");
    assert!(harness.bus.publish(event).is_ok());
    tokio::time::sleep(Duration::from_millis(120)).await;

    let calls = sensors.calls.load(Ordering::SeqCst);
    assert!((1..=4).contains(&calls), "calls = {calls}");
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_refuse_start_after_stop() {
    let harness = Harness::new(ControllerConfig::default()).await;
    let reconciler = harness.register(DeviceReconciler::new(harness.base())).await;

    harness.controller.stop().await;
    assert_eq!(harness.controller.start().await, Err(Error::Stopped));

    harness.publish_created();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reconciler.call_count(), 0);
    harness.bus.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_wait_requeue_after_before_second_pass() {
    let delay = Duration::from_millis(200);
    let harness = Harness::new(ControllerConfig::default()).await;
    let mut device = DeviceReconciler::new(harness.base());
    device.first_pass = Some(ReconcileResult::requeue_after(delay));
    let reconciler = harness.register(device).await;
    assert!(harness.controller.start().await.is_ok());

    harness.publish_created();

    assert!(wait_until(Duration::from_secs(2), || reconciler.call_count() >= 2).await);
    let calls = reconciler.calls();
    assert!(calls[1].duration_since(calls[0]) >= delay);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_retry_failed_reconcile_with_backoff() {
    let config = ControllerConfig::default()
        .with_retry_delays(Duration::from_millis(50), Duration::from_millis(50));
    let harness = Harness::new(config).await;
    let mut device = DeviceReconciler::new(harness.base());
    device.fail_first = true;
    let reconciler = harness.register(device).await;
    assert!(harness.controller.start().await.is_ok());

    harness.publish_created();

    assert!(wait_until(Duration::from_secs(2), || reconciler.call_count() >= 2).await);
    let calls = reconciler.calls();
    assert!(calls[1].duration_since(calls[0]) >= Duration::from_millis(50));

    let request = converge_reconciler::ReconcileRequest::new("Device", "dev-1", "check");
    assert!(
        wait_until(Duration::from_secs(1), || harness.controller.num_requeues(&request) == 0).await
    );

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_never_reconcile_one_resource_concurrently() {
    let harness = Harness::new(ControllerConfig::default().with_workers(4)).await;
    let mut device = DeviceReconciler::new(harness.base());
    device.work = Duration::from_millis(20);
    let reconciler = harness.register(device).await;
    assert!(harness.controller.start().await.is_ok());

    for _ in 0..20 {
        harness.publish_created();
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(reconciler.call_count() >= 1);
    assert_eq!(reconciler.overlaps.load(Ordering::SeqCst), 0);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_resync_stored_resources_without_events() {
    let config = ControllerConfig::default().with_resync_interval(Duration::from_millis(50));
    let harness = Harness::new(config).await;
    let reconciler = harness.register(DeviceReconciler::new(harness.base())).await;
    assert!(harness.controller.start().await.is_ok());

    assert!(wait_until(Duration::from_secs(2), || reconciler.call_count() >= 2).await);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_emit_resource_events_after_status_update() {
    let harness = Harness::new(ControllerConfig::default()).await;
    let reconciler = harness.register(DeviceReconciler::new(harness.base())).await;

    let emitted = Arc::new(AtomicUsize::new(0));
    {
        let emitted = Arc::clone(&emitted);
        let subscribed = harness
            .bus
            .subscribe(
                "converge.device.updated",
                handler_fn(move |event: Arc<Event>| {
                    let emitted = Arc::clone(&emitted);
                    async move {
                        if event.resource_uid() == Some("dev-1") {
                            emitted.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(())
                    }
                }),
            )
            .await;
        assert!(subscribed.is_ok());
    }
    assert!(harness.controller.start().await.is_ok());

    harness.publish_created();

    assert!(wait_until(Duration::from_secs(2), || emitted.load(Ordering::SeqCst) == 1).await);
    assert_eq!(reconciler.call_count(), 1);
    harness.shutdown().await;
}
