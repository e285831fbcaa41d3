//! Remote index objects.
//!
//! Each attached generation writes its own `index_part.json-{gen:08x}` per
//! timeline. It lists the uploaded layers that make up the timeline and the
//! lsn up to which they are complete. A newly attached node reads the index
//! with the highest generation not above its own.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_core::{Generation, Lsn, TenantId, TimelineId};
use strata_remote::{ObjectStore, paths};

use crate::error::{LocationError, LocationResult};
use crate::layer::LayerName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLayer {
    pub size: u64,
    /// Generation suffix of the uploaded object.
    pub generation: Generation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPart {
    pub disk_consistent_lsn: Lsn,
    pub layers: BTreeMap<LayerName, IndexLayer>,
}

impl IndexPart {
    pub fn new(layers: BTreeMap<LayerName, IndexLayer>) -> Self {
        let disk_consistent_lsn = layers
            .keys()
            .map(LayerName::end_lsn)
            .max()
            .unwrap_or(Lsn::INVALID);
        Self {
            disk_consistent_lsn,
            layers,
        }
    }

    pub fn encode(&self) -> LocationResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| LocationError::Corrupt(format!("encode index: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> LocationResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| LocationError::Corrupt(format!("decode index: {e}")))
    }
}

/// Download the index with the highest generation `<= at_most`.
pub async fn download_latest_index(
    remote: &dyn ObjectStore,
    tenant_id: TenantId,
    timeline_id: TimelineId,
    at_most: Generation,
) -> LocationResult<Option<(Generation, IndexPart)>> {
    let prefix = paths::timeline_prefix(tenant_id, timeline_id).join(paths::INDEX_NAME);
    let best = remote
        .list_objects(&prefix)
        .await?
        .into_iter()
        .filter_map(|path| paths::parse_index_generation(&path).map(|g| (g, path)))
        .filter(|(g, _)| *g <= at_most)
        .max_by_key(|(g, _)| *g);

    let Some((generation, path)) = best else {
        return Ok(None);
    };
    let index = IndexPart::decode(&remote.get_object(&path).await?)?;
    debug!(
        %tenant_id, %timeline_id, %generation,
        disk_consistent_lsn = %index.disk_consistent_lsn,
        "loaded remote index"
    );
    Ok(Some((generation, index)))
}

/// Timelines that have anything in the object store.
pub async fn remote_timelines(
    remote: &dyn ObjectStore,
    tenant_id: TenantId,
) -> LocationResult<Vec<TimelineId>> {
    let mut out: Vec<TimelineId> = remote
        .list_objects(&paths::timelines_prefix(tenant_id))
        .await?
        .iter()
        .filter_map(|path| paths::parse_timeline_id(tenant_id, path))
        .collect();
    out.dedup();
    Ok(out)
}
