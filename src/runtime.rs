//! Process wiring: one event bus, one storage and one controller built from
//! a [`RuntimeConfig`].

use std::sync::Arc;

use converge_core::{InMemoryStorage, Storage, TracingStorage};
use converge_events::{Event, EventBus, EventBusBuilder, InMemoryEventBus, handler_fn};
use converge_reconciler::{BaseReconciler, Controller, Reconciler, Result};
use tracing::{debug, info};

use crate::config::RuntimeConfig;

/// A running converge instance.
pub struct Runtime {
    config: RuntimeConfig,
    bus: Arc<InMemoryEventBus>,
    storage: Arc<dyn Storage>,
    controller: Controller,
}

impl Runtime {
    /// Build a runtime backed by traced in-memory storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus or controller configuration is invalid,
    /// or if called outside a tokio runtime.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(TracingStorage::new(InMemoryStorage::new()));
        Self::with_storage(config, storage)
    }

    /// Build a runtime over the given storage.
    ///
    /// # Errors
    ///
    /// Same as [`Runtime::new`].
    pub fn with_storage(config: RuntimeConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let bus = Arc::new(
            EventBusBuilder::new()
                .with_config(config.event_bus.clone())
                .build()?,
        );
        let controller = Controller::new(bus.clone(), Arc::clone(&storage), config.controller.clone())?;

        Ok(Self {
            config,
            bus,
            storage,
            controller,
        })
    }

    /// Helpers for reconcilers running in this process.
    pub fn base_reconciler(&self) -> BaseReconciler {
        BaseReconciler::new(
            Arc::clone(&self.storage),
            self.bus.clone(),
            self.config.naming.clone(),
            self.config.source.clone(),
        )
    }

    /// Register a reconciler with the controller.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateReconciler` if the kind is taken.
    pub async fn register(&self, reconciler: Arc<dyn Reconciler>) -> Result<()> {
        self.controller.register_reconciler(reconciler).await
    }

    /// Attach the debug event log and start the controller.
    ///
    /// # Errors
    ///
    /// Returns the subscription or `AlreadyStarted` error.
    pub async fn start(&self) -> Result<()> {
        self.bus
            .subscribe(
                "**",
                handler_fn(|event: Arc<Event>| async move {
                    debug!(
                        event_type = %event.event_type(),
                        source = %event.source(),
                        id = %event.id(),
                        "Event"
                    );
                    Ok(())
                }),
            )
            .await?;
        self.controller.start().await?;

        info!(
            kinds = ?self.controller.registered_kinds().await,
            buffer = self.config.event_bus.buffer_size,
            "Runtime started"
        );
        Ok(())
    }

    /// Stop the controller, then drain and close the bus.
    pub async fn shutdown(&self) {
        self.controller.stop().await;
        self.bus.close().await;
        info!("Runtime stopped");
    }

    /// Get the configuration.
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get the event bus.
    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }

    /// Get the storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Get the controller.
    pub const fn controller(&self) -> &Controller {
        &self.controller
    }
}
