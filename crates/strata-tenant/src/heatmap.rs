//! Heatmap publishing for attached locations.
//!
//! The attached node periodically writes `heatmap-v1.json` listing every
//! uploaded layer of every timeline, hottest first, stamped with its
//! generation. Secondaries use it to decide what to prefetch. Stale
//! attachments never publish.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use strata_core::HeatmapManifest;
use strata_remote::paths;

use crate::error::{LocationError, LocationResult};
use crate::task::BackgroundTask;
use crate::tenant::{AttachedTenant, Attachment};

pub async fn build_heatmap(tenant: &AttachedTenant) -> HeatmapManifest {
    let mut timelines = Vec::new();
    for timeline in tenant.timelines().await {
        timelines.push(timeline.heatmap().await);
    }
    HeatmapManifest {
        generation: tenant.attachment().generation,
        timelines,
    }
}

/// Build and upload the heatmap. Returns `None` when the attachment mode
/// does not allow remote writes.
pub async fn publish_heatmap(tenant: &AttachedTenant) -> LocationResult<Option<HeatmapManifest>> {
    let tenant_id = tenant.tenant_id();
    let Attachment { mode, generation } = tenant.attachment();
    if !mode.remote_writes() {
        debug!(%tenant_id, %generation, "attachment is stale, not publishing heatmap");
        return Ok(None);
    }

    let ctx = tenant.context();
    if !ctx.authority.validate(tenant_id, ctx.node_id, generation).await? {
        return Err(LocationError::FencingRejected {
            tenant_id,
            generation,
            reason: "generation superseded, heatmap not published".into(),
        });
    }

    let manifest = build_heatmap(tenant).await;
    let body = manifest
        .to_bytes()
        .map_err(|e| LocationError::Corrupt(format!("encode heatmap: {e}")))?;
    ctx.remote
        .put_object(&paths::heatmap_path(tenant_id), Bytes::from(body))
        .await?;

    let layers: usize = manifest.timelines.iter().map(|t| t.layers.len()).sum();
    info!(%tenant_id, %generation, layers, "published heatmap");
    Ok(Some(manifest))
}

pub(crate) fn spawn_publisher(tenant: Arc<AttachedTenant>) -> BackgroundTask {
    let name = format!("heatmap-{}", tenant.tenant_id());
    BackgroundTask::spawn(name, move |mut shutdown| async move {
        loop {
            let period = tenant.settings().await.heatmap_period;
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = publish_heatmap(&tenant).await {
                        warn!(tenant_id = %tenant.tenant_id(), error = %e, "heatmap upload failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
