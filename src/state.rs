//! Persistence of the last activation timestamp of every target.
//!
//! The store is loaded once at startup so the registry can restore a target's
//! `last_notified` when it registers. While running, the store follows
//! `Activated` events and flushes to its backend periodically and once more on
//! shutdown. Events are a fast path only: before every flush the store also
//! reads the live timestamps from an `ActivationSource` (the registry), so a
//! lagged or closed event channel never loses an activation. In-flight sends
//! are never persisted.

use crate::events::TargetEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

const STATE_VERSION: u32 = 1;

/// Persisted state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTargetState {
    pub last_notified: DateTime<Utc>,
}

/// The on-disk document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    #[serde(default)]
    pub targets: BTreeMap<String, StoredTargetState>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            targets: BTreeMap::new(),
        }
    }
}

/// Where the snapshot lives.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Loads the last saved snapshot. A backend with nothing saved yet
    /// returns an empty snapshot.
    async fn load(&self) -> Result<StateSnapshot>;

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// Provides the live activation timestamps of registered targets.
pub trait ActivationSource: Send + Sync {
    fn activations(&self) -> Vec<(String, DateTime<Utc>)>;
}

/// Stores the snapshot as a JSON file.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self) -> Result<StateSnapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet, starting empty");
                return Ok(StateSnapshot::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", self.path.display()))
            }
        };
        // A corrupt file only costs the restored timestamps.
        let snapshot: StateSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable state file, starting empty");
                return Ok(StateSnapshot::default());
            }
        };
        if snapshot.version != STATE_VERSION {
            anyhow::bail!(
                "unsupported state file version {} in {}",
                snapshot.version,
                self.path.display()
            );
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(snapshot)?;
        // Write next to the target and rename so readers never see a torn file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing state file {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps the snapshot in memory. Useful for tests and for running without a
/// state file.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    saved: Arc<Mutex<Option<StateSnapshot>>>,
}

impl MemoryBackend {
    /// Starts from a previously saved snapshot.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Some(snapshot))),
        }
    }

    /// The last snapshot handed to `save`, if any.
    pub fn saved(&self) -> Option<StateSnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.saved().unwrap_or_default())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.saved.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

/// In-memory view of persisted activation state, backed by a `StateBackend`.
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    targets: Mutex<BTreeMap<String, DateTime<Utc>>>,
    dirty: Mutex<bool>,
}

impl StateStore {
    /// Loads the previously saved state from `backend`.
    pub async fn load(backend: Arc<dyn StateBackend>) -> Result<Self> {
        let snapshot = backend.load().await?;
        info!(targets = snapshot.targets.len(), "Loaded persisted notify state");
        let targets = snapshot
            .targets
            .into_iter()
            .map(|(identity, state)| (identity, state.last_notified))
            .collect();
        Ok(Self {
            backend,
            targets: Mutex::new(targets),
            dirty: Mutex::new(false),
        })
    }

    /// The last recorded activation of `identity`.
    pub fn restored(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.targets.lock().unwrap().get(identity).copied()
    }

    /// Records an activation. Older timestamps never overwrite newer ones.
    /// Returns true if the stored state changed.
    pub fn record(&self, identity: &str, at: DateTime<Utc>) -> bool {
        let mut targets = self.targets.lock().unwrap();
        match targets.get(identity) {
            Some(prev) if *prev >= at => return false,
            _ => {
                targets.insert(identity.to_string(), at);
            }
        }
        *self.dirty.lock().unwrap() = true;
        true
    }

    /// Records every activation `source` currently reports.
    pub fn sync_from(&self, source: &dyn ActivationSource) {
        let changed = source
            .activations()
            .into_iter()
            .filter(|(identity, at)| self.record(identity, *at))
            .count();
        if changed > 0 {
            debug!(changed, "Picked up activations from the registry");
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let targets = self
            .targets
            .lock()
            .unwrap()
            .iter()
            .map(|(identity, at)| (identity.clone(), StoredTargetState { last_notified: *at }))
            .collect();
        StateSnapshot {
            version: STATE_VERSION,
            targets,
        }
    }

    /// Writes the current state to the backend if anything changed.
    pub async fn flush(&self) -> Result<()> {
        let was_dirty = std::mem::replace(&mut *self.dirty.lock().unwrap(), false);
        if !was_dirty {
            return Ok(());
        }
        let snapshot = self.snapshot();
        if let Err(e) = self.backend.save(&snapshot).await {
            *self.dirty.lock().unwrap() = true;
            return Err(e);
        }
        debug!(targets = snapshot.targets.len(), "Flushed notify state");
        Ok(())
    }

    /// Follows activation events and flushes periodically until shutdown.
    ///
    /// `source` is consulted before each flush and whenever the event
    /// channel lags, so activations missed on the channel are still saved.
    #[instrument(skip_all)]
    pub async fn run(
        self: Arc<Self>,
        source: Arc<dyn ActivationSource>,
        mut event_rx: broadcast::Receiver<TargetEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
        flush_interval: Duration,
    ) {
        let mut timer = interval(flush_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("State persister received shutdown signal.");
                    break;
                }
                _ = timer.tick() => {
                    self.sync_from(&*source);
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "Failed to flush notify state");
                    }
                }
                result = event_rx.recv() => match result {
                    Ok(TargetEvent::Activated { identity, at }) => {
                        self.record(&identity, at);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("State persister lagged and missed {} events, resyncing.", n);
                        self.sync_from(&*source);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed. State persister shutting down.");
                        break;
                    }
                }
            }
        }

        // Pick up activations that raced with the shutdown signal.
        loop {
            match event_rx.try_recv() {
                Ok(TargetEvent::Activated { identity, at }) => {
                    self.record(&identity, at);
                }
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        self.sync_from(&*source);
        if let Err(e) = self.flush().await {
            error!(error = %e, "Failed to flush notify state on shutdown");
        }
    }
}
