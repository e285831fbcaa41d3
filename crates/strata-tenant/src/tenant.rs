//! Attached tenant — the timelines and ingestion of a tenant that this node
//! serves under some generation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::info;

use strata_core::{AttachmentMode, Generation, TenantId, TenantSettings, TimelineId};

use crate::context::NodeContext;
use crate::error::{LocationError, LocationResult};
use crate::index::{download_latest_index, remote_timelines};
use crate::ingest::Ingestor;
use crate::layer::LocalLayers;
use crate::timeline::Timeline;

/// The attachment a tenant currently runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub mode: AttachmentMode,
    pub generation: Generation,
}

#[derive(Default)]
struct IngestState {
    running: bool,
    ingestors: HashMap<TimelineId, Ingestor>,
}

pub struct AttachedTenant {
    tenant_id: TenantId,
    ctx: Arc<NodeContext>,
    attachment: watch::Sender<Attachment>,
    settings: RwLock<TenantSettings>,
    timelines: RwLock<BTreeMap<TimelineId, Arc<Timeline>>>,
    ingest: Mutex<IngestState>,
}

impl AttachedTenant {
    /// Load every timeline from its newest remote index at or below our
    /// generation. Layer files already on local disk (left by a secondary)
    /// are reused instead of downloaded. Nothing is started yet.
    pub(crate) async fn attach(
        ctx: Arc<NodeContext>,
        tenant_id: TenantId,
        attachment: Attachment,
        settings: TenantSettings,
        mut local: LocalLayers,
    ) -> LocationResult<Arc<Self>> {
        let (attachment_tx, _) = watch::channel(attachment);

        let mut ids: BTreeSet<TimelineId> = remote_timelines(ctx.remote.as_ref(), tenant_id)
            .await?
            .into_iter()
            .collect();
        ids.extend(ctx.log.timelines(tenant_id).await?);

        let mut timelines = BTreeMap::new();
        for timeline_id in ids {
            let index = download_latest_index(
                ctx.remote.as_ref(),
                tenant_id,
                timeline_id,
                attachment.generation,
            )
            .await?
            .map(|(_, index)| index);
            let timeline = Timeline::new(
                tenant_id,
                timeline_id,
                ctx.clone(),
                attachment_tx.subscribe(),
                settings.checkpoint_distance,
                index,
                local.remove(&timeline_id).unwrap_or_default(),
            );
            timelines.insert(timeline_id, Arc::new(timeline));
        }

        info!(
            %tenant_id, generation = %attachment.generation, mode = ?attachment.mode,
            timelines = timelines.len(), "tenant loaded"
        );

        Ok(Arc::new(Self {
            tenant_id,
            ctx,
            attachment: attachment_tx,
            settings: RwLock::new(settings),
            timelines: RwLock::new(timelines),
            ingest: Mutex::new(IngestState::default()),
        }))
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub(crate) fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn attachment(&self) -> Attachment {
        *self.attachment.borrow()
    }

    pub(crate) fn set_attachment(&self, attachment: Attachment) {
        self.attachment.send_replace(attachment);
    }

    pub async fn settings(&self) -> TenantSettings {
        self.settings.read().await.clone()
    }

    pub(crate) async fn update_settings(&self, settings: TenantSettings) {
        for timeline in self.timelines.read().await.values() {
            timeline.set_checkpoint_distance(settings.checkpoint_distance);
        }
        *self.settings.write().await = settings;
    }

    pub async fn timeline(&self, timeline_id: TimelineId) -> LocationResult<Arc<Timeline>> {
        self.timelines
            .read()
            .await
            .get(&timeline_id)
            .cloned()
            .ok_or_else(|| LocationError::NotFound(format!("timeline {}/{timeline_id}", self.tenant_id)))
    }

    pub async fn timelines(&self) -> Vec<Arc<Timeline>> {
        self.timelines.read().await.values().cloned().collect()
    }

    /// Create an empty timeline (or return the existing one) and start
    /// ingesting it if ingestion is running.
    pub async fn create_timeline(&self, timeline_id: TimelineId) -> LocationResult<Arc<Timeline>> {
        self.ctx.log.ensure_timeline(self.tenant_id, timeline_id).await?;

        let mut ingest = self.ingest.lock().await;
        let mut timelines = self.timelines.write().await;
        if let Some(existing) = timelines.get(&timeline_id) {
            return Ok(existing.clone());
        }
        let settings = self.settings.read().await.clone();
        let timeline = Arc::new(Timeline::new(
            self.tenant_id,
            timeline_id,
            self.ctx.clone(),
            self.attachment.subscribe(),
            settings.checkpoint_distance,
            None,
            BTreeMap::new(),
        ));
        timelines.insert(timeline_id, timeline.clone());
        if ingest.running {
            let ingestor = self.start_ingestor(timeline.clone());
            ingest.ingestors.insert(timeline_id, ingestor);
        }
        info!(tenant_id = %self.tenant_id, %timeline_id, "timeline created");
        Ok(timeline)
    }

    /// Start ingestion for every timeline that is not already ingesting.
    pub(crate) async fn start_ingest(&self) {
        let mut ingest = self.ingest.lock().await;
        ingest.running = true;
        for (timeline_id, timeline) in self.timelines.read().await.iter() {
            if !ingest.ingestors.contains_key(timeline_id) {
                let ingestor = self.start_ingestor(timeline.clone());
                ingest.ingestors.insert(*timeline_id, ingestor);
            }
        }
    }

    /// Stop and drain all ingestion. Every ingestor is stopped even if an
    /// earlier one fails; the first failure is returned.
    pub(crate) async fn stop_ingest(&self, timeout: Duration) -> Result<(), String> {
        let mut ingest = self.ingest.lock().await;
        ingest.running = false;
        let mut result = Ok(());
        for (_, ingestor) in ingest.ingestors.drain() {
            if let Err(e) = ingestor.stop(timeout).await {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Generation ingestion was started under, if it is running.
    pub(crate) async fn ingest_generation(&self) -> Option<Generation> {
        let ingest = self.ingest.lock().await;
        if !ingest.running {
            return None;
        }
        ingest
            .ingestors
            .values()
            .map(Ingestor::generation)
            .max()
            .or(Some(self.attachment().generation))
    }

    /// Freeze and upload every timeline.
    pub async fn checkpoint(&self) -> LocationResult<()> {
        for timeline in self.timelines().await {
            timeline.checkpoint().await?;
        }
        Ok(())
    }

    /// Resident layer files of every timeline.
    pub(crate) async fn local_layers(&self) -> LocalLayers {
        let mut out = HashMap::new();
        for timeline in self.timelines().await {
            out.insert(timeline.timeline_id(), timeline.resident_layers().await);
        }
        out
    }

    fn start_ingestor(&self, timeline: Arc<Timeline>) -> Ingestor {
        Ingestor::start(
            timeline,
            self.ctx.log.clone(),
            self.attachment().generation,
            self.ctx.config.ingest_poll_interval(),
        )
    }
}
