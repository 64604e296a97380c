//! The target registry.
//!
//! Readers (`resolve`, `snapshot`) load an immutable map through `ArcSwap`
//! and never wait on writers or on in-flight sends. Writers serialize on a
//! short mutex, copy the map, and publish the new version.

use crate::core::{display_name, resolve_device_class, DeviceClass, NotifyFeature, NotifyTarget};
use crate::events::{EventBus, TargetEvent};
use crate::state::{ActivationSource, StateStore};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Observable state of a target.
#[derive(Debug, Default)]
pub struct TargetState {
    last_notified: Mutex<Option<DateTime<Utc>>>,
}

impl TargetState {
    pub fn last_notified(&self) -> Option<DateTime<Utc>> {
        *self.last_notified.lock().unwrap()
    }

    /// Stamps an activation at `now` and returns the stored value.
    ///
    /// The stored value never moves backwards, so stamps applied in program
    /// order are non-decreasing even if the wall clock steps back.
    pub fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last_notified.lock().unwrap();
        let at = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(at);
        at
    }
}

/// A registered target together with its identity and observable state.
pub struct TargetEntry {
    identity: String,
    order: u64,
    target: Arc<dyn NotifyTarget>,
    state: Arc<TargetState>,
}

impl TargetEntry {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn target(&self) -> &Arc<dyn NotifyTarget> {
        &self.target
    }

    pub fn state(&self) -> &TargetState {
        &self.state
    }

    pub fn last_notified(&self) -> Option<DateTime<Utc>> {
        self.state.last_notified()
    }

    pub fn supported_features(&self) -> NotifyFeature {
        self.target.description().supported_features
    }

    pub fn info(&self) -> TargetInfo {
        TargetInfo {
            identity: self.identity.clone(),
            name: display_name(&self.identity, self.target.as_ref()),
            device_class: resolve_device_class(self.target.as_ref()),
            supported_features: self.supported_features(),
            last_notified: self.last_notified(),
        }
    }
}

/// Discovery record returned by `TargetRegistry::snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetInfo {
    pub identity: String,
    pub name: String,
    pub device_class: Option<DeviceClass>,
    pub supported_features: NotifyFeature,
    pub last_notified: Option<DateTime<Utc>>,
}

type EntryMap = HashMap<String, Arc<TargetEntry>>;

/// Holds every registered target, keyed by identity.
pub struct TargetRegistry {
    entries: ArcSwap<EntryMap>,
    write_lock: Mutex<u64>,
    events: EventBus,
    restore: Option<Arc<StateStore>>,
}

impl TargetRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(0),
            events,
            restore: None,
        }
    }

    /// Restores `last_notified` from `store` for targets registered later.
    pub fn with_restore(mut self, store: Arc<StateStore>) -> Self {
        self.restore = Some(store);
        self
    }

    /// Inserts `target` under `identity`.
    ///
    /// A target already registered under `identity` is torn down before the
    /// new one is installed. The replacement inherits its observable state,
    /// so `last_notified` never goes back to unset.
    #[instrument(skip(self, target))]
    pub fn register(&self, identity: &str, target: Arc<dyn NotifyTarget>) {
        let restored = self.restore.as_ref().and_then(|store| store.restored(identity));

        {
            let mut next_order = self.write_lock.lock().unwrap();
            let current = self.entries.load_full();
            let (order, state) = match current.get(identity) {
                Some(previous) => {
                    info!(target_id = identity, "Replacing notify target");
                    Self::teardown(previous);
                    (previous.order, previous.state.clone())
                }
                None => {
                    *next_order += 1;
                    (*next_order, Arc::new(TargetState::default()))
                }
            };
            if let Some(at) = restored {
                state.stamp(at);
                debug!(target_id = identity, at = %at.to_rfc3339(), "Restored last activation");
            }
            let entry = Arc::new(TargetEntry {
                identity: identity.to_string(),
                order,
                target,
                state,
            });
            let mut next = EntryMap::clone(&current);
            next.insert(identity.to_string(), entry);
            self.entries.store(Arc::new(next));
        }

        metrics::gauge!("notify_targets_registered").set(self.len() as f64);
        self.events.publish(TargetEvent::Registered {
            identity: identity.to_string(),
        });
    }

    /// Removes `identity`. Unknown identities are ignored.
    #[instrument(skip(self))]
    pub fn unregister(&self, identity: &str) {
        let removed = {
            let _guard = self.write_lock.lock().unwrap();
            let current = self.entries.load_full();
            if !current.contains_key(identity) {
                debug!(target_id = identity, "Unregister of unknown target ignored");
                return;
            }
            let mut next = EntryMap::clone(&current);
            let removed = next.remove(identity);
            self.entries.store(Arc::new(next));
            removed
        };

        if let Some(entry) = removed {
            Self::teardown(&entry);
        }
        metrics::gauge!("notify_targets_registered").set(self.len() as f64);
        self.events.publish(TargetEvent::Removed {
            identity: identity.to_string(),
        });
    }

    /// Looks up the current target for `identity`.
    pub fn resolve(&self, identity: &str) -> Option<Arc<TargetEntry>> {
        self.entries.load().get(identity).cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.load().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Point-in-time listing of every target, in discovery order.
    pub fn snapshot(&self) -> Vec<TargetInfo> {
        let entries = self.entries.load_full();
        let mut ordered: Vec<&Arc<TargetEntry>> = entries.values().collect();
        ordered.sort_unstable_by_key(|entry| entry.order);
        ordered.into_iter().map(|entry| entry.info()).collect()
    }

    /// Removes and tears down every target.
    pub fn clear(&self) {
        let drained = {
            let _guard = self.write_lock.lock().unwrap();
            self.entries.swap(Arc::new(HashMap::new()))
        };
        let mut entries: Vec<&Arc<TargetEntry>> = drained.values().collect();
        entries.sort_unstable_by_key(|entry| entry.order);
        for entry in entries {
            Self::teardown(entry);
            self.events.publish(TargetEvent::Removed {
                identity: entry.identity.clone(),
            });
        }
        metrics::gauge!("notify_targets_registered").set(0.0);
    }

    fn teardown(entry: &TargetEntry) {
        if let Err(e) = entry.target.teardown() {
            warn!(target_id = %entry.identity, error = %e, "Notify target teardown failed");
        }
    }
}

impl ActivationSource for TargetRegistry {
    fn activations(&self) -> Vec<(String, DateTime<Utc>)> {
        self.entries
            .load()
            .values()
            .filter_map(|entry| Some((entry.identity.clone(), entry.last_notified()?)))
            .collect()
    }
}
