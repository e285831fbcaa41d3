//! Secondary locations — warm standbys that prefetch the layers named in
//! the attached node's heatmap.
//!
//! A download pass reads the heatmap, ignores it if it comes from an older
//! generation than one already seen, and fetches missing layers with bounded
//! concurrency. Timelines and layers no longer in the heatmap are dropped
//! locally, so what a secondary holds tracks the latest manifest.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use strata_core::{Generation, HeatmapManifest, TenantId, TimelineId};
use strata_remote::{ObjectStore, paths};

use crate::context::NodeContext;
use crate::error::{LocationError, LocationResult};
use crate::layer::{LayerFile, LayerName, LocalLayers};
use crate::task::BackgroundTask;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    /// Generation of the heatmap acted on, if one was found.
    pub heatmap_generation: Option<Generation>,
    pub downloaded: usize,
    pub already_local: usize,
    pub removed_timelines: usize,
    /// Layers of listed timelines that the heatmap no longer names.
    pub removed_layers: usize,
    /// The heatmap was older than one already seen and was ignored.
    pub ignored_stale_heatmap: bool,
}

pub struct SecondaryTenant {
    tenant_id: TenantId,
    ctx: Arc<NodeContext>,
    layers: RwLock<LocalLayers>,
    /// Highest heatmap generation acted on. Also serializes passes.
    seen_generation: Mutex<Option<Generation>>,
}

impl SecondaryTenant {
    pub(crate) fn new(ctx: Arc<NodeContext>, tenant_id: TenantId, layers: LocalLayers) -> Arc<Self> {
        Arc::new(Self {
            tenant_id,
            ctx,
            layers: RwLock::new(layers),
            seen_generation: Mutex::new(None),
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Snapshot of everything held locally.
    pub async fn local_layers(&self) -> LocalLayers {
        self.layers.read().await.clone()
    }

    pub async fn layer_names(&self, timeline_id: TimelineId) -> Vec<LayerName> {
        self.layers
            .read()
            .await
            .get(&timeline_id)
            .map(|layers| layers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Run one download pass.
    pub async fn download(&self) -> LocationResult<DownloadStats> {
        let mut seen = self.seen_generation.lock().await;
        let mut stats = DownloadStats::default();

        let body = match self.ctx.remote.get_object(&paths::heatmap_path(self.tenant_id)).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                debug!(tenant_id = %self.tenant_id, "no heatmap yet");
                return Ok(stats);
            }
            Err(e) => return Err(e.into()),
        };
        let manifest = HeatmapManifest::from_bytes(&body)
            .map_err(|e| LocationError::Corrupt(format!("heatmap: {e}")))?;

        if let Some(previous) = *seen {
            if manifest.generation < previous {
                warn!(
                    tenant_id = %self.tenant_id, heatmap_generation = %manifest.generation,
                    %previous, "ignoring heatmap from older generation"
                );
                stats.ignored_stale_heatmap = true;
                return Ok(stats);
            }
        }
        *seen = Some(manifest.generation);
        stats.heatmap_generation = Some(manifest.generation);

        let mut wanted = Vec::new();
        {
            let local = self.layers.read().await;
            for timeline in &manifest.timelines {
                let have = local.get(&timeline.timeline_id);
                for layer in &timeline.layers {
                    let Some(name) = LayerName::parse(&layer.name) else {
                        warn!(tenant_id = %self.tenant_id, layer = %layer.name, "skipping malformed layer name");
                        continue;
                    };
                    if have.is_some_and(|h| h.contains_key(&name)) {
                        stats.already_local += 1;
                    } else {
                        wanted.push((timeline.timeline_id, name, layer.generation));
                    }
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.ctx.config.download_concurrency.max(1)));
        let mut downloads = JoinSet::new();
        for (timeline_id, name, generation) in wanted {
            let semaphore = semaphore.clone();
            let remote = self.ctx.remote.clone();
            let tenant_id = self.tenant_id;
            downloads.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| LocationError::Corrupt(format!("download slot: {e}")))?;
                let file = download_layer(remote.as_ref(), tenant_id, timeline_id, &name, generation).await?;
                Ok::<_, LocationError>((timeline_id, name, file))
            });
        }

        let mut first_error = None;
        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok(Ok((timeline_id, name, file))) => {
                    self.layers
                        .write()
                        .await
                        .entry(timeline_id)
                        .or_default()
                        .insert(name, Arc::new(file));
                    stats.downloaded += 1;
                }
                Ok(Err(e)) => {
                    warn!(tenant_id = %self.tenant_id, error = %e, "layer download failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    warn!(tenant_id = %self.tenant_id, error = %e, "layer download task failed");
                    if first_error.is_none() {
                        first_error = Some(LocationError::Corrupt(format!("download task: {e}")));
                    }
                }
            }
        }

        {
            let mut local = self.layers.write().await;
            let before = local.len();
            local.retain(|timeline_id, _| manifest.timeline(*timeline_id).is_some());
            stats.removed_timelines = before - local.len();

            for (timeline_id, layers) in local.iter_mut() {
                let Some(listed) = manifest.timeline(*timeline_id) else {
                    continue;
                };
                let listed: HashSet<&str> = listed.layers.iter().map(|l| l.name.as_str()).collect();
                let before = layers.len();
                layers.retain(|name, _| listed.contains(name.as_str()));
                stats.removed_layers += before - layers.len();
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        info!(
            tenant_id = %self.tenant_id, heatmap_generation = %manifest.generation,
            downloaded = stats.downloaded, already_local = stats.already_local,
            removed_timelines = stats.removed_timelines, removed_layers = stats.removed_layers,
            "secondary download pass complete"
        );
        Ok(stats)
    }
}

async fn download_layer(
    remote: &dyn ObjectStore,
    tenant_id: TenantId,
    timeline_id: TimelineId,
    name: &LayerName,
    generation: Generation,
) -> LocationResult<LayerFile> {
    let path = paths::layer_path(tenant_id, timeline_id, name.as_str(), generation);
    let file = LayerFile::decode(&remote.get_object(&path).await?)?;
    if &file.name() != name {
        return Err(LocationError::Corrupt(format!(
            "object {path} holds layer {}",
            file.name()
        )));
    }
    Ok(file)
}

/// Download immediately, then once per `period`.
pub(crate) fn spawn_downloader(tenant: Arc<SecondaryTenant>, period: Duration) -> BackgroundTask {
    let name = format!("secondary-download-{}", tenant.tenant_id());
    BackgroundTask::spawn(name, move |mut shutdown| async move {
        loop {
            if let Err(e) = tenant.download().await {
                warn!(tenant_id = %tenant.tenant_id(), error = %e, "secondary download failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => break,
            }
        }
    })
}
