//! Heatmap manifest — the durable per-tenant list of hot layers.
//!
//! Written wholesale by the attached node and read by secondaries. The only
//! structural invariant is that layer names are unique within a timeline.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{Generation, TimelineId};

/// Snapshot of the layers an attached node considers hot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapManifest {
    /// Generation of the node that published this manifest.
    pub generation: Generation,
    pub timelines: Vec<HeatmapTimeline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapTimeline {
    pub timeline_id: TimelineId,
    /// Hottest first.
    pub layers: Vec<HeatmapLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapLayer {
    pub name: String,
    pub size: u64,
    /// Generation under which the layer object was uploaded.
    pub generation: Generation,
    /// Unix seconds of the last access on the publishing node.
    pub last_access_hint: u64,
}

impl HeatmapManifest {
    /// Check that no timeline lists the same layer twice.
    pub fn validate(&self) -> CoreResult<()> {
        for timeline in &self.timelines {
            let mut seen = HashSet::with_capacity(timeline.layers.len());
            for layer in &timeline.layers {
                if !seen.insert(layer.name.as_str()) {
                    return Err(CoreError::DuplicateHeatmapLayer {
                        timeline: timeline.timeline_id.to_string(),
                        layer: layer.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn timeline(&self, timeline_id: TimelineId) -> Option<&HeatmapTimeline> {
        self.timelines.iter().find(|t| t.timeline_id == timeline_id)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode and validate a manifest read from the object store.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let manifest: HeatmapManifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }
}
