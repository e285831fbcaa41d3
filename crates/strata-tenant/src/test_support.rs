//! Shared fixtures for unit tests: a node wired to in-memory collaborators.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{Generation, Lsn, NodeConfig, NodeId, TenantId, TenantSettings, TimelineId};
use strata_generation::{GenerationAuthority, LocalAuthority};
use strata_remote::{InMemoryStore, ObjectStore, RemotePath};
use strata_state::StateStore;

use crate::context::NodeContext;
use crate::timeline::Timeline;
use crate::wal::WalService;

pub(crate) const TENANT: TenantId = TenantId::from_bytes([0xaa; 16]);
pub(crate) const TIMELINE: TimelineId = TimelineId::from_bytes([0xbb; 16]);

pub(crate) struct TestNode {
    pub ctx: Arc<NodeContext>,
    pub wal: WalService,
    pub remote: Arc<InMemoryStore>,
    pub state: StateStore,
    pub authority: Arc<LocalAuthority>,
}

pub(crate) fn test_config(node_id: u64) -> NodeConfig {
    NodeConfig {
        node_id: NodeId(node_id),
        secondary_download_period_secs: 3600,
        download_concurrency: 2,
        ingest_poll_interval_ms: 10,
        teardown_timeout_ms: 5_000,
        default_tenant: TenantSettings {
            checkpoint_distance: 4,
            heatmap_period: Duration::from_secs(3600),
        },
        ..NodeConfig::default()
    }
}

impl TestNode {
    pub fn new(node_id: u64) -> Self {
        let state = StateStore::open_in_memory().unwrap();
        let authority = Arc::new(LocalAuthority::new(state.clone()));
        Self::build(node_id, WalService::new(), Arc::new(InMemoryStore::new()), state, authority)
    }

    /// Another node sharing the same log, object store and authority.
    pub fn peer(&self, node_id: u64) -> Self {
        Self::build(
            node_id,
            self.wal.clone(),
            self.remote.clone(),
            self.state.clone(),
            self.authority.clone(),
        )
    }

    fn build(
        node_id: u64,
        wal: WalService,
        remote: Arc<InMemoryStore>,
        state: StateStore,
        authority: Arc<LocalAuthority>,
    ) -> Self {
        let ctx = NodeContext::new(
            test_config(node_id),
            remote.clone(),
            authority.clone(),
            Arc::new(wal.clone()),
        );
        Self {
            ctx: Arc::new(ctx),
            wal,
            remote,
            state,
            authority,
        }
    }

    pub async fn issue(&self, node_id: NodeId) -> Generation {
        self.authority.issue_generation(TENANT, node_id).await.unwrap()
    }

    pub async fn write(&self, key: u64, value: &'static str) -> Lsn {
        self.wal.append(TENANT, TIMELINE, key, value).await
    }

    /// Write `value-{key}` for every key, returning the last lsn.
    pub async fn write_many(&self, keys: Range<u64>) -> Lsn {
        let mut last = Lsn::INVALID;
        for key in keys {
            last = self
                .wal
                .append(TENANT, TIMELINE, key, format!("value-{key}"))
                .await;
        }
        last
    }

    pub async fn remote_keys(&self) -> Vec<String> {
        self.remote
            .list_objects(&RemotePath::new("tenants"))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.to_string())
            .collect()
    }
}

pub(crate) async fn wait_for_lsn(timeline: &Timeline, lsn: Lsn) {
    timeline.wait_lsn(lsn, Duration::from_secs(5)).await.unwrap();
}
