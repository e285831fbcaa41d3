//! Remote key layout.
//!
//! ```text
//! tenants/{tenant}/heatmap-v1.json
//! tenants/{tenant}/timelines/{timeline}/{layer}-{generation:08x}
//! tenants/{tenant}/timelines/{timeline}/index_part.json-{generation:08x}
//! ```
//!
//! Layer and index keys carry the writer's generation so readers can tell
//! artifacts of a superseded generation apart from current ones.

use std::fmt;

use strata_core::{Generation, TenantId, TimelineId};

pub const HEATMAP_NAME: &str = "heatmap-v1.json";
pub const INDEX_NAME: &str = "index_part.json";

/// A `/`-separated object key relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}/{}", self.0.trim_end_matches('/'), segment))
        }
    }

    /// The last path segment.
    pub fn object_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn tenant_prefix(tenant_id: TenantId) -> RemotePath {
    RemotePath::new(format!("tenants/{tenant_id}"))
}

pub fn heatmap_path(tenant_id: TenantId) -> RemotePath {
    tenant_prefix(tenant_id).join(HEATMAP_NAME)
}

pub fn timelines_prefix(tenant_id: TenantId) -> RemotePath {
    tenant_prefix(tenant_id).join("timelines")
}

pub fn timeline_prefix(tenant_id: TenantId, timeline_id: TimelineId) -> RemotePath {
    timelines_prefix(tenant_id).join(&timeline_id.to_string())
}

pub fn layer_path(
    tenant_id: TenantId,
    timeline_id: TimelineId,
    layer_name: &str,
    generation: Generation,
) -> RemotePath {
    timeline_prefix(tenant_id, timeline_id)
        .join(&format!("{layer_name}{}", generation.key_suffix()))
}

pub fn index_path(tenant_id: TenantId, timeline_id: TimelineId, generation: Generation) -> RemotePath {
    timeline_prefix(tenant_id, timeline_id).join(&format!("{INDEX_NAME}{}", generation.key_suffix()))
}

/// The generation of an index object, if `path` names one.
pub fn parse_index_generation(path: &RemotePath) -> Option<Generation> {
    match Generation::parse_key_suffix(path.object_name()) {
        Some((INDEX_NAME, generation)) => Some(generation),
        _ => None,
    }
}

/// The timeline a key under `timelines_prefix(tenant)` belongs to.
pub fn parse_timeline_id(tenant_id: TenantId, path: &RemotePath) -> Option<TimelineId> {
    let prefix = timelines_prefix(tenant_id);
    let rest = path.as_str().strip_prefix(prefix.as_str())?.strip_prefix('/')?;
    rest.split('/').next()?.parse().ok()
}
