//! Durable record types.

use serde::{Deserialize, Serialize};

use strata_core::{Generation, LocationConf, NodeId, TenantId};

/// Last realized location of a tenant on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub node_id: NodeId,
    pub tenant_id: TenantId,
    pub conf: LocationConf,
    /// Unix timestamp of the transition that produced this record.
    pub updated_at: u64,
}

impl LocationRecord {
    pub fn table_key(&self) -> String {
        location_key(self.node_id, self.tenant_id)
    }
}

pub(crate) fn location_key(node_id: NodeId, tenant_id: TenantId) -> String {
    format!("{node_id}/{tenant_id}")
}

/// The most recent generation issued for a tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRecord {
    pub tenant_id: TenantId,
    pub generation: Generation,
    pub node_id: NodeId,
    pub issued_at: u64,
}

pub(crate) fn issued_key(tenant_id: TenantId, generation: Generation) -> String {
    format!("{tenant_id}:{:08x}", generation.into_inner())
}
