//! The view of a storage node the orchestrator drives.

use std::collections::BTreeMap;

use async_trait::async_trait;

use strata_core::{LocationConf, Lsn, NodeId, TenantId, TimelineId};
use strata_tenant::{LocationController, LocationResult, LocationState};

#[async_trait]
pub trait LocationNode: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Current configuration; detached when the node holds nothing.
    async fn location_conf(&self, tenant_id: TenantId) -> LocationConf;

    async fn configure(&self, tenant_id: TenantId, conf: LocationConf) -> LocationResult<LocationState>;

    /// Publish a heatmap if attached in a mode that writes remotely.
    async fn upload_heatmap(&self, tenant_id: TenantId) -> LocationResult<()>;

    /// Run one secondary download pass.
    async fn download_secondary(&self, tenant_id: TenantId) -> LocationResult<()>;

    /// Last applied lsn per timeline of an attached tenant.
    async fn timeline_positions(&self, tenant_id: TenantId) -> LocationResult<BTreeMap<TimelineId, Lsn>>;
}

#[async_trait]
impl LocationNode for LocationController {
    fn node_id(&self) -> NodeId {
        LocationController::node_id(self)
    }

    async fn location_conf(&self, tenant_id: TenantId) -> LocationConf {
        self.location(tenant_id)
            .await
            .map(|state| state.conf)
            .unwrap_or_else(LocationConf::detached)
    }

    async fn configure(&self, tenant_id: TenantId, conf: LocationConf) -> LocationResult<LocationState> {
        LocationController::configure(self, tenant_id, conf).await
    }

    async fn upload_heatmap(&self, tenant_id: TenantId) -> LocationResult<()> {
        LocationController::upload_heatmap(self, tenant_id).await.map(|_| ())
    }

    async fn download_secondary(&self, tenant_id: TenantId) -> LocationResult<()> {
        LocationController::download_secondary(self, tenant_id).await.map(|_| ())
    }

    async fn timeline_positions(&self, tenant_id: TenantId) -> LocationResult<BTreeMap<TimelineId, Lsn>> {
        LocationController::timeline_positions(self, tenant_id).await
    }
}
