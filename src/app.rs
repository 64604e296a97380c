//! The main application wiring, decoupled from the entry point.

use crate::{
    config::Config,
    core::NotifyTarget,
    dispatch::Dispatcher,
    events::{logging_subscriber, EventBus},
    offload::Offload,
    registry::TargetRegistry,
    state::{JsonFileBackend, MemoryBackend, StateBackend, StateStore},
    targets::{build_target, target_identity, PersistentNotifications, TargetContext},
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    dispatcher: Arc<Dispatcher>,
    events: EventBus,
    state: Arc<StateStore>,
    persistent: PersistentNotifications,
    default_timeout: Option<Duration>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn registry(&self) -> Arc<TargetRegistry> {
        self.dispatcher.registry().clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state_store(&self) -> Arc<StateStore> {
        self.state.clone()
    }

    /// Inbox shared by every `persistent` target.
    pub fn persistent_notifications(&self) -> &PersistentNotifications {
        &self.persistent
    }

    /// Deadline callers should apply when awaiting a send.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Waits for the shutdown signal, then tears targets down and waits for
    /// the background tasks. Activation state is flushed on the way out.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow_and_update() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let panicked = self.task_manager.shutdown().await;
        let registry = self.dispatcher.registry();
        self.state.sync_from(&**registry);
        registry.clear();
        self.state
            .flush()
            .await
            .context("flushing notify state on shutdown")?;

        if !panicked.is_empty() {
            anyhow::bail!("background tasks panicked: {}", panicked.join(", "));
        }
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Separates constructing the components from running them, and lets tests
/// swap the state backend or register targets that are not in the config.
pub struct AppBuilder {
    config: Config,
    state_backend_override: Option<Arc<dyn StateBackend>>,
    persistent_override: Option<PersistentNotifications>,
    extra_targets: Vec<(String, Arc<dyn NotifyTarget>)>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state_backend_override: None,
            persistent_override: None,
            extra_targets: Vec::new(),
        }
    }

    /// Overrides where activation state is loaded from and saved to.
    pub fn state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state_backend_override = Some(backend);
        self
    }

    /// Uses `inbox` for every `persistent` target.
    pub fn persistent_notifications(mut self, inbox: PersistentNotifications) -> Self {
        self.persistent_override = Some(inbox);
        self
    }

    /// Registers a target that is not described in the configuration.
    pub fn target(mut self, identity: impl Into<String>, target: Arc<dyn NotifyTarget>) -> Self {
        self.extra_targets.push((identity.into(), target));
        self
    }

    /// Builds and initializes all application components, returning a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);
        let events = EventBus::new(config.events.capacity);

        // =========================================================================
        // 1. Restore persisted state
        // =========================================================================
        let backend: Arc<dyn StateBackend> = match (self.state_backend_override, &config.state.path) {
            (Some(backend), _) => backend,
            (None, Some(path)) => {
                info!(path = %path.display(), "Persisting notify state to file");
                Arc::new(JsonFileBackend::new(path))
            }
            (None, None) => {
                warn!("No state path configured, activation state will not survive a restart.");
                Arc::new(MemoryBackend::default())
            }
        };
        let state = Arc::new(StateStore::load(backend).await?);

        let registry = Arc::new(TargetRegistry::new(events.clone()).with_restore(state.clone()));

        // =========================================================================
        // 2. Start subscribers before anything is published
        // =========================================================================
        task_manager.spawn(
            "LoggingSubscriber",
            logging_subscriber::run(events.subscribe(), task_manager.get_shutdown_rx()),
        );
        task_manager.spawn(
            "StatePersister",
            state.clone().run(
                registry.clone(),
                events.subscribe(),
                task_manager.get_shutdown_rx(),
                Duration::from_secs(config.state.flush_interval_seconds),
            ),
        );

        // =========================================================================
        // 3. Register targets
        // =========================================================================
        let persistent = self.persistent_override.unwrap_or_default();
        let ctx = TargetContext {
            persistent: persistent.clone(),
        };

        for target_config in &config.targets {
            let identity = target_identity(target_config)?;
            let target = build_target(target_config, &ctx).map_err(|e| {
                error!(target_id = %identity, error = %e, "Invalid target configuration");
                e
            })?;
            if registry.contains(&identity) {
                warn!(target_id = %identity, "Duplicate target identity in configuration, replacing earlier entry");
            }
            registry.register(&identity, target);
        }
        for (identity, target) in self.extra_targets {
            registry.register(&identity, target);
        }
        info!(targets = registry.len(), "Notify targets registered");

        // =========================================================================
        // 4. Dispatch service
        // =========================================================================
        let offload = Offload::new(config.offload.max_workers, events.clone());
        info!(max_workers = offload.max_workers(), "Send worker pool ready");
        let dispatcher = Arc::new(
            Dispatcher::new(registry, offload, events.clone())
                .enforce_features(config.dispatch.enforce_features),
        );

        Ok(App {
            task_manager,
            dispatcher,
            events,
            state,
            persistent,
            default_timeout: config.dispatch.default_timeout_seconds.map(Duration::from_secs),
        })
    }
}
