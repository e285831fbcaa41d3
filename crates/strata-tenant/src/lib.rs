//! strata-tenant — the Location Controller and the per-tenant data plane.
//!
//! - **`LocationController`**: per-node state machine moving tenants between
//!   detached, attached (single, multi, stale) and secondary, fenced by
//!   generations from the `GenerationAuthority`.
//! - **`AttachedTenant` / `Timeline`**: ingestion from the log source, layer
//!   freezing and generation-tagged uploads, index publication, reads with
//!   on-demand download of evicted layers.
//! - **Heatmaps**: attached nodes publish which layers are hot.
//! - **`SecondaryTenant`**: warm standbys prefetch the heatmap's layers.

pub mod context;
pub mod controller;
pub mod error;
pub mod heatmap;
pub mod index;
pub mod ingest;
pub mod layer;
pub mod secondary;
pub mod task;
pub mod tenant;
pub mod timeline;
pub mod wal;

#[cfg(test)]
mod test_support;

pub use context::NodeContext;
pub use controller::{LocationController, LocationState, RecoveryReport, TenantHealth};
pub use error::{LocationError, LocationResult};
pub use heatmap::{build_heatmap, publish_heatmap};
pub use layer::{LayerFile, LayerName, LayerStore, LocalLayers};
pub use secondary::{DownloadStats, SecondaryTenant};
pub use tenant::{AttachedTenant, Attachment};
pub use timeline::{LayerInfo, Timeline, TimelineDetail};
pub use wal::{LogSource, WalRecord, WalService};
