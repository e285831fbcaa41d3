//! Background task slots.
//!
//! Every long-running loop owned by a location (ingestion, heatmap
//! publishing, secondary downloads) is spawned through `BackgroundTask` so it
//! can be drained: signal shutdown, then wait for the loop to return.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct BackgroundTask {
    name: String,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl BackgroundTask {
    /// Spawn `run` with a shutdown receiver. The loop must return promptly
    /// once the receiver changes.
    pub fn spawn<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = name.into();
        let handle = tokio::spawn(run(shutdown_rx));
        debug!(task = %name, "background task started");
        Self {
            name,
            handle,
            shutdown_tx,
        }
    }

    /// Signal shutdown and wait up to `timeout` for the task to finish.
    ///
    /// A task that does not finish in time is aborted and reported as an
    /// error, as is one that panicked.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), String> {
        let Self {
            name,
            mut handle,
            shutdown_tx,
        } = self;
        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                debug!(task = %name, "background task stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(task = %name, error = %e, "background task failed");
                Err(format!("task {name} failed: {e}"))
            }
            Err(_) => {
                handle.abort();
                warn!(task = %name, ?timeout, "background task did not stop in time");
                Err(format!("task {name} did not stop within {timeout:?}"))
            }
        }
    }
}
