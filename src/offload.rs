//! Execution offload for blocking sends.
//!
//! Every submission becomes a tokio task that waits for a worker permit and
//! then runs `NotifyTarget::send_message` on the blocking thread pool. The
//! number of permits bounds how many sends block a thread at once,
//! independently of how many targets are registered.

use crate::core::{Message, NotifyTarget};
use crate::error::DispatchError;
use crate::events::{EventBus, TargetEvent};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, instrument, Instrument};

/// Bounded pool that runs sends off the dispatch path.
#[derive(Clone)]
pub struct Offload {
    permits: Arc<Semaphore>,
    max_workers: usize,
    events: EventBus,
    runtime: Handle,
}

impl Offload {
    /// Creates a pool that runs sends on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime. Use `with_runtime` to
    /// construct the pool elsewhere.
    pub fn new(max_workers: usize, events: EventBus) -> Self {
        Self::with_runtime(max_workers, events, Handle::current())
    }

    /// Creates a pool that runs sends on `runtime`. Submissions may then come
    /// from any thread, inside a runtime or not.
    pub fn with_runtime(max_workers: usize, events: EventBus, runtime: Handle) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            events,
            runtime,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of sends currently holding a worker.
    pub fn busy_workers(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Schedules a send on the pool's runtime and returns immediately.
    #[instrument(skip(self, target, message))]
    pub fn submit(
        &self,
        identity: &str,
        target: Arc<dyn NotifyTarget>,
        message: Message,
    ) -> SendHandle {
        let permits = self.permits.clone();
        let events = self.events.clone();
        let owned_identity = identity.to_string();

        let join = self.runtime.spawn(
            async move {
                let identity = owned_identity;
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| DispatchError::send_failure(&identity, e.into()))?;

                let started = Instant::now();
                let outcome = task::spawn_blocking(move || target.send_message(&message)).await;
                metrics::histogram!("notify_send_duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                let result = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(join_err) => Err(anyhow::anyhow!("send task aborted: {join_err}")),
                };

                match result {
                    Ok(()) => {
                        debug!(target_id = %identity, "Notification sent");
                        metrics::counter!("notify_sends_total", "target" => identity.clone())
                            .increment(1);
                        events.publish(TargetEvent::SendSucceeded {
                            identity: identity.clone(),
                        });
                        Ok(())
                    }
                    Err(e) => {
                        error!(target_id = %identity, error = %e, "Notification send failed");
                        metrics::counter!("notify_send_failures_total", "target" => identity.clone())
                            .increment(1);
                        events.publish(TargetEvent::SendFailed {
                            identity: identity.clone(),
                            error: format!("{e:#}"),
                        });
                        Err(DispatchError::send_failure(identity, e))
                    }
                }
            }
            .in_current_span(),
        );

        SendHandle {
            identity: identity.to_string(),
            join,
        }
    }
}

/// Waits for every handle at once, each bounded by `timeout` when given.
/// Results keep the order of `handles`.
pub async fn wait_all(
    handles: Vec<SendHandle>,
    timeout: Option<Duration>,
) -> Vec<(String, Result<(), DispatchError>)> {
    join_all(handles.into_iter().map(|handle| async move {
        let identity = handle.identity().to_string();
        let result = match timeout {
            Some(timeout) => handle.wait_timeout(timeout).await,
            None => handle.wait().await,
        };
        (identity, result)
    }))
    .await
}

/// Handle to a submitted send.
///
/// Dropping the handle detaches it: the send still runs to completion and
/// its failure is still logged.
#[derive(Debug)]
pub struct SendHandle {
    identity: String,
    join: JoinHandle<Result<(), DispatchError>>,
}

impl SendHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the send to complete.
    pub async fn wait(self) -> Result<(), DispatchError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::send_failure(
                self.identity,
                anyhow::anyhow!("send task aborted: {e}"),
            )),
        }
    }

    /// Waits for at most `timeout`. An expired deadline does not cancel the
    /// underlying send.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<(), DispatchError> {
        let identity = self.identity.clone();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout { identity, timeout }),
        }
    }

    /// Explicitly gives up on the outcome.
    pub fn detach(self) {}
}
