//! Node-wide collaborators shared by every location on the node.

use std::sync::Arc;

use strata_core::{NodeConfig, NodeId};
use strata_generation::GenerationAuthority;
use strata_remote::ObjectStore;

use crate::wal::LogSource;

#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub config: NodeConfig,
    pub remote: Arc<dyn ObjectStore>,
    pub authority: Arc<dyn GenerationAuthority>,
    pub log: Arc<dyn LogSource>,
}

impl NodeContext {
    pub fn new(
        config: NodeConfig,
        remote: Arc<dyn ObjectStore>,
        authority: Arc<dyn GenerationAuthority>,
        log: Arc<dyn LogSource>,
    ) -> Self {
        Self {
            node_id: config.node_id,
            config,
            remote,
            authority,
            log,
        }
    }
}
