//! In-process cluster fixture: several location controllers sharing one
//! log, one object store and one generation authority.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use strata_core::{
    AttachmentMode, Lsn, NodeConfig, NodeId, TenantConf, TenantId, TenantSettings, TimelineId,
};
use strata_generation::LocalAuthority;
use strata_remote::{InMemoryStore, ObjectStore};
use strata_state::StateStore;
use strata_tenant::{LocationController, LogSource, NodeContext, WalService};

pub const TENANT: TenantId = TenantId::from_bytes([0x11; 16]);
pub const TIMELINE: TimelineId = TimelineId::from_bytes([0x22; 16]);
pub const WAIT: Duration = Duration::from_secs(10);

pub struct Cluster {
    pub state: StateStore,
    pub authority: Arc<LocalAuthority>,
    pub remote: Arc<dyn ObjectStore>,
    pub wal: WalService,
}

pub fn node_config(node_id: u64) -> NodeConfig {
    NodeConfig {
        node_id: NodeId(node_id),
        secondary_download_period_secs: 3600,
        download_concurrency: 4,
        ingest_poll_interval_ms: 10,
        teardown_timeout_ms: 5_000,
        default_tenant: TenantSettings {
            checkpoint_distance: 8,
            heatmap_period: Duration::from_secs(3600),
        },
        ..NodeConfig::default()
    }
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_remote(Arc::new(InMemoryStore::new()))
    }

    pub fn with_remote(remote: Arc<dyn ObjectStore>) -> Self {
        let state = StateStore::open_in_memory().unwrap();
        Self {
            authority: Arc::new(LocalAuthority::new(state.clone())),
            state,
            remote,
            wal: WalService::new(),
        }
    }

    /// A fresh controller for `node_id`. Calling this again for the same id
    /// models a process restart: durable records survive, memory does not.
    pub fn node(&self, node_id: u64) -> Arc<LocationController> {
        let ctx = NodeContext::new(
            node_config(node_id),
            self.remote.clone(),
            self.authority.clone(),
            Arc::new(self.wal.clone()),
        );
        Arc::new(LocationController::new(ctx, self.state.clone()))
    }

    pub async fn create_timeline(&self) {
        self.wal.ensure_timeline(TENANT, TIMELINE).await;
    }

    pub async fn write(&self, key: u64, value: impl Into<String>) -> Lsn {
        self.wal.append(TENANT, TIMELINE, key, value.into()).await
    }

    /// Write `row-{key}` for every key in the range, returning the last lsn.
    pub async fn write_rows(&self, keys: std::ops::Range<u64>) -> Lsn {
        let mut last = Lsn::INVALID;
        for key in keys {
            last = self.write(key, format!("row-{key}")).await;
        }
        last
    }
}

pub async fn attach(node: &LocationController, mode: AttachmentMode) {
    node.attach_with_new_generation(TENANT, mode, TenantConf::default())
        .await
        .unwrap();
}

pub async fn read(node: &LocationController, key: u64) -> Option<String> {
    node.read(TENANT, TIMELINE, key)
        .await
        .unwrap()
        .map(|v| String::from_utf8(v.to_vec()).unwrap())
}

pub async fn wait(node: &LocationController, lsn: Lsn) {
    node.wait_lsn(TENANT, TIMELINE, lsn, WAIT).await.unwrap();
}
