//! Observable state changes of notify targets.
//!
//! The registry, the dispatcher and the offload pool publish `TargetEvent`s on
//! a broadcast bus. Subscribers (the state persister, the logging subscriber,
//! tests) observe activations without being coupled to the dispatch path.
pub mod logging_subscriber;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// A change in the observable state of a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TargetEvent {
    Registered { identity: String },
    Removed { identity: String },
    /// Published when a dispatch stamps the target, before the send runs.
    Activated {
        identity: String,
        at: DateTime<Utc>,
    },
    SendSucceeded { identity: String },
    SendFailed { identity: String, error: String },
}

impl TargetEvent {
    pub fn identity(&self) -> &str {
        match self {
            TargetEvent::Registered { identity }
            | TargetEvent::Removed { identity }
            | TargetEvent::Activated { identity, .. }
            | TargetEvent::SendSucceeded { identity }
            | TargetEvent::SendFailed { identity, .. } => identity,
        }
    }
}

/// Cloneable handle to the event broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TargetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: TargetEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
