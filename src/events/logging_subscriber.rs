//! A simple subscriber that logs every target event.
//!
//! Failed sends that nobody awaited only become visible here, so this
//! subscriber is always spawned by the application.

use crate::events::TargetEvent;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

/// Logs events until the bus closes or shutdown is signalled.
#[instrument(skip_all)]
pub async fn run(mut event_rx: broadcast::Receiver<TargetEvent>, mut shutdown_rx: watch::Receiver<bool>) {
    info!("LoggingSubscriber started.");
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("LoggingSubscriber received shutdown signal.");
                break;
            }
            result = event_rx.recv() => match result {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("LoggingSubscriber lagged behind and missed {} events.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event channel closed. LoggingSubscriber shutting down.");
                    break;
                }
            }
        }
    }
}

fn log_event(event: &TargetEvent) {
    match event {
        TargetEvent::Registered { identity } => info!(target_id = %identity, "Notify target registered"),
        TargetEvent::Removed { identity } => info!(target_id = %identity, "Notify target removed"),
        TargetEvent::Activated { identity, at } => {
            debug!(target_id = %identity, at = %at.to_rfc3339(), "Notify target activated")
        }
        TargetEvent::SendSucceeded { identity } => {
            debug!(target_id = %identity, "Notification delivered")
        }
        TargetEvent::SendFailed { identity, error } => {
            warn!(target_id = %identity, %error, "Notification delivery failed")
        }
    }
}
