//! strata-core — shared vocabulary for the strata storage node.
//!
//! Identifiers, generation numbers, the location-mode sum type and its
//! loosely-typed wire counterpart, resolved tenant settings, the durable
//! heatmap manifest format, and the node configuration file.

pub mod config;
pub mod error;
pub mod heatmap;
pub mod location;
pub mod settings;
pub mod types;

pub use config::{ControlPlane, NodeConfig};
pub use error::{CoreError, CoreResult};
pub use heatmap::{HeatmapLayer, HeatmapManifest, HeatmapTimeline};
pub use location::{
    AttachmentMode, LocationConf, LocationConfigRequest, LocationMode, LocationModeName,
    SecondaryConf, TenantConf,
};
pub use settings::{TenantSettings, parse_duration};
pub use types::*;
