//! Tracks the background tasks of the application.
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Owns the `JoinHandle`s of long-running tasks (event subscribers, the state
/// persister) and the shutdown signal they listen to.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a named task and keeps its handle.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles.lock().unwrap().push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn task_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Waits for every task to finish. Returns the names of tasks that panicked.
    pub async fn shutdown(self) -> Vec<&'static str> {
        let handles = self.handles.lock().unwrap().drain(..).collect::<Vec<_>>();
        info!("TaskManager waiting for {} tasks to complete...", handles.len());

        let (names, joins): (Vec<&'static str>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        let results = join_all(joins).await;

        let mut panicked = Vec::new();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name = name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name = name, error = %e, "Task panicked during shutdown.");
                    panicked.push(name);
                }
            }
        }

        if panicked.is_empty() {
            info!("All tasks shut down gracefully.");
        }
        panicked
    }
}
