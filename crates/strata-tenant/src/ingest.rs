//! Ingestion — one background loop per attached timeline that pulls records
//! from the log source and applies them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use strata_core::Generation;

use crate::error::{LocationError, LocationResult};
use crate::task::BackgroundTask;
use crate::timeline::Timeline;
use crate::wal::LogSource;

const READ_BATCH: usize = 1024;

pub struct Ingestor {
    generation: Generation,
    task: BackgroundTask,
}

impl Ingestor {
    pub fn start(
        timeline: Arc<Timeline>,
        log: Arc<dyn LogSource>,
        generation: Generation,
        poll_interval: Duration,
    ) -> Self {
        let name = format!("ingest-{}", timeline.timeline_id());
        let task = BackgroundTask::spawn(name, move |shutdown| {
            ingest_loop(timeline, log, generation, poll_interval, shutdown)
        });
        Self {
            generation,
            task,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Stop and drain. In-flight batches finish before this returns.
    pub async fn stop(self, timeout: Duration) -> Result<(), String> {
        self.task.shutdown(timeout).await
    }
}

async fn ingest_loop(
    timeline: Arc<Timeline>,
    log: Arc<dyn LogSource>,
    generation: Generation,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut appended = log.subscribe();
    debug!(timeline_id = %timeline.timeline_id(), %generation, "ingestion starting");

    loop {
        match ingest_available(&timeline, log.as_ref()).await {
            Ok(()) => {}
            // The log for a timeline known only from the object store may
            // not exist yet.
            Err(LocationError::NotFound(what)) => {
                debug!(timeline_id = %timeline.timeline_id(), %what, "nothing to ingest");
            }
            Err(e) => warn!(
                timeline_id = %timeline.timeline_id(), %generation, error = %e,
                "ingestion step failed"
            ),
        }

        tokio::select! {
            changed = appended.changed() => {
                if changed.is_err() {
                    tokio::time::sleep(poll_interval).await;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {
                debug!(timeline_id = %timeline.timeline_id(), "ingestion shutting down");
                break;
            }
        }
    }
}

async fn ingest_available(timeline: &Timeline, log: &dyn LogSource) -> LocationResult<()> {
    let tenant_id = timeline.tenant_id();
    loop {
        let records = log
            .read_after(tenant_id, timeline.timeline_id(), timeline.last_record_lsn(), READ_BATCH)
            .await?;
        if records.is_empty() {
            return Ok(());
        }
        timeline.ingest(records).await?;
    }
}
