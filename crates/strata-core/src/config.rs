//! strata.toml node configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::TenantSettings;
use crate::types::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub listen_port: u16,
    /// Local state (redb file) lives here.
    pub data_dir: PathBuf,
    /// Root of the local-filesystem object store shared by all nodes.
    pub remote_storage: PathBuf,
    pub secondary_download_period_secs: u64,
    pub download_concurrency: usize,
    pub ingest_poll_interval_ms: u64,
    /// How long a transition waits for background work to drain.
    pub teardown_timeout_ms: u64,
    /// Where the generation authority and the log live.
    pub control_plane: ControlPlane,
    pub default_tenant: TenantSettings,
}

/// Placement of the cluster's single generation authority and log.
///
/// Exactly one node runs `embedded`; every other node points at it with
/// `remote`, so all generations come from one counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ControlPlane {
    /// This node hosts the authority and the log.
    #[default]
    Embedded,
    /// Another node hosts them; reach it over its management API.
    Remote {
        /// `host:port` of the control plane node.
        address: String,
        #[serde(default = "default_control_plane_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_control_plane_timeout_ms() -> u64 {
    5_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(1),
            listen_port: 9898,
            data_dir: PathBuf::from("/var/lib/strata"),
            remote_storage: PathBuf::from("/var/lib/strata/remote"),
            secondary_download_period_secs: 60,
            download_concurrency: 4,
            ingest_poll_interval_ms: 100,
            teardown_timeout_ms: 30_000,
            control_plane: ControlPlane::Embedded,
            default_tenant: TenantSettings::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn secondary_download_period(&self) -> Duration {
        Duration::from_secs(self.secondary_download_period_secs)
    }

    pub fn ingest_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ingest_poll_interval_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}
