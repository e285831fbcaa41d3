//! Location controller — the per-node tenant state machine.
//!
//! Every tenant has a slot holding its current `LocationConf` and the local
//! resources realizing it. `configure` is the only way to change a slot.
//! Requests for one tenant run strictly one after another (the slot's
//! mutex is fair, so in arrival order); different tenants never block each
//! other.
//!
//! A transition goes through four steps:
//!
//! 1. **Admit**: attached targets are checked against the generation
//!    authority. Nothing has changed yet, so a rejection leaves the tenant
//!    exactly as it was.
//! 2. **Prepare**: fallible loading (remote indexes) happens before any
//!    running work is disturbed.
//! 3. **Stop**: background work the target does not keep is drained.
//! 4. **Persist and install**: the durable record is written, then the new
//!    resources are installed and their background work started.
//!
//! Readers see a published snapshot of the slot, so reads are not blocked
//! while a transition is in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use strata_core::{
    AttachmentMode, Generation, HeatmapManifest, LocationConf, LocationMode, Lsn, NodeId,
    TenantConf, TenantId, TenantSettings, TimelineId, epoch_secs,
};
use strata_generation::{GenerationStatus, Issued};
use strata_state::{LocationRecord, StateStore};

use crate::context::NodeContext;
use crate::error::{LocationError, LocationResult};
use crate::heatmap::{publish_heatmap, spawn_publisher};
use crate::layer::{LayerName, LayerStore, LocalLayers};
use crate::secondary::{DownloadStats, SecondaryTenant, spawn_downloader};
use crate::task::BackgroundTask;
use crate::tenant::{AttachedTenant, Attachment};
use crate::timeline::TimelineDetail;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TenantHealth {
    Active,
    /// A transition failed while stopping background work. The location
    /// keeps its last successful configuration until the next request.
    Broken { reason: String },
}

/// Public view of a tenant's slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationState {
    pub tenant_id: TenantId,
    pub conf: LocationConf,
    pub health: TenantHealth,
}

/// Outcome of restoring locations at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub attached: Vec<TenantId>,
    pub secondary: Vec<TenantId>,
    /// Records whose generation is no longer provably ours.
    pub detached: Vec<TenantId>,
}

enum Resources {
    Detached,
    Attached {
        tenant: Arc<AttachedTenant>,
        heatmap: Option<BackgroundTask>,
    },
    Secondary {
        tenant: Arc<SecondaryTenant>,
        downloader: Option<BackgroundTask>,
    },
}

/// What a transition will install once the old work is stopped.
enum Target {
    Detached,
    Attached(Arc<AttachedTenant>, Attachment),
    Secondary,
}

struct SlotInner {
    conf: LocationConf,
    health: TenantHealth,
    resources: Resources,
}

impl SlotInner {
    fn state(&self, tenant_id: TenantId) -> LocationState {
        LocationState {
            tenant_id,
            conf: self.conf.clone(),
            health: self.health.clone(),
        }
    }
}

#[derive(Clone, Default)]
struct Published {
    state: Option<LocationState>,
    attached: Option<Arc<AttachedTenant>>,
    secondary: Option<Arc<SecondaryTenant>>,
}

struct TenantSlot {
    inner: Mutex<SlotInner>,
    published: RwLock<Published>,
}

impl TenantSlot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                conf: LocationConf::detached(),
                health: TenantHealth::Active,
                resources: Resources::Detached,
            }),
            published: RwLock::new(Published::default()),
        }
    }

    async fn publish(&self, tenant_id: TenantId, inner: &SlotInner) {
        let state = (inner.conf.mode != LocationMode::Detached).then(|| inner.state(tenant_id));
        let (attached, secondary) = match &inner.resources {
            Resources::Detached => (None, None),
            Resources::Attached { tenant, .. } => (Some(tenant.clone()), None),
            Resources::Secondary { tenant, .. } => (None, Some(tenant.clone())),
        };
        *self.published.write().await = Published {
            state,
            attached,
            secondary,
        };
    }
}

pub struct LocationController {
    ctx: Arc<NodeContext>,
    state: StateStore,
    slots: RwLock<HashMap<TenantId, Arc<TenantSlot>>>,
}

impl LocationController {
    pub fn new(ctx: NodeContext, state: StateStore) -> Self {
        Self {
            ctx: Arc::new(ctx),
            state,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.ctx.node_id
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    // ── Configuration ─────────────────────────────────────────────

    /// Move a tenant to `conf`.
    ///
    /// Re-applying the current configuration is a no-op apart from
    /// re-checking the generation with the authority.
    pub async fn configure(
        &self,
        tenant_id: TenantId,
        conf: LocationConf,
    ) -> LocationResult<LocationState> {
        let settings = self.ctx.config.default_tenant.resolve(&conf.tenant_conf)?;
        let slot = self.slot(tenant_id).await;
        let mut inner = slot.inner.lock().await;

        let result = self.apply(tenant_id, &slot, &mut inner, conf, settings).await;
        if inner.conf.mode == LocationMode::Detached && inner.health == TenantHealth::Active {
            self.release_slot(tenant_id, &slot).await;
        }
        result
    }

    async fn apply(
        &self,
        tenant_id: TenantId,
        slot: &TenantSlot,
        inner: &mut SlotInner,
        conf: LocationConf,
        settings: TenantSettings,
    ) -> LocationResult<LocationState> {
        if let Some((mode, generation)) = conf.mode.attachment() {
            if let Some(current) = inner.conf.mode.generation() {
                if generation < current {
                    return Err(LocationError::ConfigConflict(format!(
                        "generation {generation} is older than the attached generation {current}"
                    )));
                }
            }
            self.admit(tenant_id, mode, generation).await?;
        }

        if inner.conf == conf && inner.health == TenantHealth::Active {
            debug!(%tenant_id, mode = ?conf.mode.name(), "location unchanged");
            return Ok(inner.state(tenant_id));
        }

        let result = self.transition(tenant_id, inner, conf, settings).await;
        slot.publish(tenant_id, inner).await;
        result.map(|()| inner.state(tenant_id))
    }

    /// Forget a detached slot unless another request is holding it.
    async fn release_slot(&self, tenant_id: TenantId, slot: &Arc<TenantSlot>) {
        let mut slots = self.slots.write().await;
        // One reference from the map, one from the caller.
        if slots.get(&tenant_id).is_some_and(|s| Arc::ptr_eq(s, slot)) && Arc::strong_count(slot) == 2 {
            slots.remove(&tenant_id);
            debug!(%tenant_id, "released detached tenant slot");
        }
    }

    /// Ask the authority for a fresh generation for this node and attach
    /// with it.
    pub async fn attach_with_new_generation(
        &self,
        tenant_id: TenantId,
        mode: AttachmentMode,
        tenant_conf: TenantConf,
    ) -> LocationResult<LocationState> {
        let generation = self
            .ctx
            .authority
            .issue_generation(tenant_id, self.ctx.node_id)
            .await?;
        let conf = LocationConf::attached(mode, generation).with_tenant_conf(tenant_conf);
        self.configure(tenant_id, conf).await
    }

    async fn admit(
        &self,
        tenant_id: TenantId,
        mode: AttachmentMode,
        generation: Generation,
    ) -> LocationResult<()> {
        let status = self
            .ctx
            .authority
            .confirm(tenant_id, self.ctx.node_id, generation)
            .await?;
        let reason = match status {
            GenerationStatus::Current => return Ok(()),
            // A stale attachment never writes remotely, so an older
            // generation of ours is acceptable.
            GenerationStatus::Superseded { .. } if !mode.claims_latest() => return Ok(()),
            GenerationStatus::Superseded { latest } => {
                format!("superseded by generation {latest}")
            }
            GenerationStatus::Foreign => format!("not issued to node {}", self.ctx.node_id),
        };
        warn!(%tenant_id, %generation, ?mode, %reason, "attach rejected");
        Err(LocationError::FencingRejected {
            tenant_id,
            generation,
            reason,
        })
    }

    async fn transition(
        &self,
        tenant_id: TenantId,
        inner: &mut SlotInner,
        conf: LocationConf,
        settings: TenantSettings,
    ) -> LocationResult<()> {
        let from = inner.conf.mode;
        let to = conf.mode;

        let target = self.prepare(tenant_id, &inner.resources, &to, &settings).await?;

        if let Err(reason) = self.stop_background(&mut inner.resources, &target).await {
            error!(%tenant_id, from = ?from.name(), to = ?to.name(), %reason, "location teardown failed");
            inner.health = TenantHealth::Broken {
                reason: reason.clone(),
            };
            return Err(LocationError::ResourceTeardownFailure { tenant_id, reason });
        }

        if let Err(e) = self.persist(tenant_id, &conf) {
            error!(%tenant_id, error = %e, "failed to persist location, keeping previous configuration");
            self.start_background(&mut inner.resources, &from).await;
            return Err(e);
        }

        let old = std::mem::replace(&mut inner.resources, Resources::Detached);
        inner.resources = self.install(tenant_id, old, target, settings).await;
        inner.conf = conf;
        inner.health = TenantHealth::Active;
        self.start_background(&mut inner.resources, &to).await;

        info!(
            %tenant_id, from = ?from.name(), to = ?to.name(),
            generation = ?to.generation().map(|g| g.into_inner()),
            "location transition complete"
        );
        Ok(())
    }

    async fn prepare(
        &self,
        tenant_id: TenantId,
        resources: &Resources,
        to: &LocationMode,
        settings: &TenantSettings,
    ) -> LocationResult<Target> {
        let Some((mode, generation)) = to.attachment() else {
            return Ok(match to {
                LocationMode::Secondary { .. } => Target::Secondary,
                _ => Target::Detached,
            });
        };
        let attachment = Attachment { mode, generation };
        let tenant = match resources {
            Resources::Attached { tenant, .. } => tenant.clone(),
            Resources::Secondary { tenant, .. } => {
                let local = tenant.local_layers().await;
                AttachedTenant::attach(self.ctx.clone(), tenant_id, attachment, settings.clone(), local)
                    .await?
            }
            Resources::Detached => {
                AttachedTenant::attach(
                    self.ctx.clone(),
                    tenant_id,
                    attachment,
                    settings.clone(),
                    LocalLayers::new(),
                )
                .await?
            }
        };
        Ok(Target::Attached(tenant, attachment))
    }

    /// Drain background work. Ingestion survives only when the target keeps
    /// the same attached tenant under the same generation.
    async fn stop_background(&self, resources: &mut Resources, target: &Target) -> Result<(), String> {
        let timeout = self.ctx.config.teardown_timeout();
        match resources {
            Resources::Detached => Ok(()),
            Resources::Attached { tenant, heatmap } => {
                if let Some(task) = heatmap.take() {
                    task.shutdown(timeout).await?;
                }
                let keep_ingest = match target {
                    Target::Attached(next, attachment) if Arc::ptr_eq(next, tenant) => {
                        tenant.ingest_generation().await == Some(attachment.generation)
                    }
                    _ => false,
                };
                if !keep_ingest {
                    tenant.stop_ingest(timeout).await?;
                }
                Ok(())
            }
            Resources::Secondary { downloader, .. } => match downloader.take() {
                Some(task) => task.shutdown(timeout).await,
                None => Ok(()),
            },
        }
    }

    fn persist(&self, tenant_id: TenantId, conf: &LocationConf) -> LocationResult<()> {
        if conf.mode == LocationMode::Detached {
            self.state.delete_location(self.ctx.node_id, tenant_id)?;
        } else {
            self.state.put_location(&LocationRecord {
                node_id: self.ctx.node_id,
                tenant_id,
                conf: conf.clone(),
                updated_at: epoch_secs(),
            })?;
        }
        Ok(())
    }

    async fn install(
        &self,
        tenant_id: TenantId,
        old: Resources,
        target: Target,
        settings: TenantSettings,
    ) -> Resources {
        match target {
            Target::Detached => Resources::Detached,
            Target::Attached(tenant, attachment) => {
                tenant.set_attachment(attachment);
                tenant.update_settings(settings).await;
                Resources::Attached {
                    tenant,
                    heatmap: None,
                }
            }
            Target::Secondary => {
                let tenant = match old {
                    Resources::Secondary { tenant, .. } => tenant,
                    Resources::Attached { tenant, .. } => {
                        SecondaryTenant::new(self.ctx.clone(), tenant_id, tenant.local_layers().await)
                    }
                    Resources::Detached => SecondaryTenant::new(self.ctx.clone(), tenant_id, LocalLayers::new()),
                };
                Resources::Secondary {
                    tenant,
                    downloader: None,
                }
            }
        }
    }

    async fn start_background(&self, resources: &mut Resources, mode: &LocationMode) {
        match resources {
            Resources::Detached => {}
            Resources::Attached { tenant, heatmap } => {
                tenant.start_ingest().await;
                if tenant.attachment().mode.remote_writes() && heatmap.is_none() {
                    *heatmap = Some(spawn_publisher(tenant.clone()));
                }
            }
            Resources::Secondary { tenant, downloader } => {
                let warm = mode.secondary_conf().is_some_and(|c| c.warm);
                if warm && downloader.is_none() {
                    *downloader = Some(spawn_downloader(
                        tenant.clone(),
                        self.ctx.config.secondary_download_period(),
                    ));
                }
            }
        }
    }

    // ── Recovery and shutdown ─────────────────────────────────────

    /// Restore locations from durable records after a restart.
    ///
    /// An attached record is restored only if the authority still reports
    /// its generation as the latest, issued to this node. Records the
    /// authority disproves are deleted; if the authority cannot be reached
    /// the tenant stays detached but its record is kept for the next start.
    pub async fn recover(&self) -> LocationResult<RecoveryReport> {
        let records = self.state.list_locations_for_node(self.ctx.node_id)?;
        let mut report = RecoveryReport::default();

        for record in records {
            let tenant_id = record.tenant_id;
            if let Some((_, generation)) = record.conf.mode.attachment() {
                let expected = Issued {
                    generation,
                    node_id: self.ctx.node_id,
                };
                match self.ctx.authority.latest(tenant_id).await {
                    Ok(latest) if latest == Some(expected) => {}
                    Ok(latest) => {
                        info!(
                            %tenant_id, %generation, latest = ?latest.map(|i| i.generation.into_inner()),
                            "generation no longer ours, not reattaching"
                        );
                        self.state.delete_location(self.ctx.node_id, tenant_id)?;
                        report.detached.push(tenant_id);
                        continue;
                    }
                    Err(e) => {
                        warn!(%tenant_id, %generation, error = %e, "cannot confirm generation, staying detached");
                        report.detached.push(tenant_id);
                        continue;
                    }
                }
            }

            let attached = record.conf.mode.is_attached();
            match self.configure(tenant_id, record.conf).await {
                Ok(_) if attached => report.attached.push(tenant_id),
                Ok(_) => report.secondary.push(tenant_id),
                Err(e) => {
                    warn!(%tenant_id, error = %e, "failed to restore location");
                    report.detached.push(tenant_id);
                }
            }
        }

        info!(
            attached = report.attached.len(),
            secondary = report.secondary.len(),
            detached = report.detached.len(),
            "location recovery complete"
        );
        Ok(report)
    }

    /// Stop all background work on the node. Durable records are left as
    /// they are so the next start can recover.
    pub async fn shutdown(&self) {
        let slots: Vec<(TenantId, Arc<TenantSlot>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        for (tenant_id, slot) in slots {
            let mut inner = slot.inner.lock().await;
            if let Err(reason) = self.stop_background(&mut inner.resources, &Target::Detached).await {
                warn!(%tenant_id, %reason, "background work did not stop cleanly");
            }
        }
        info!(node_id = %self.ctx.node_id, "location controller stopped");
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Current location of a tenant, `None` when detached.
    pub async fn location(&self, tenant_id: TenantId) -> Option<LocationState> {
        self.published(tenant_id).await.state
    }

    pub async fn list_locations(&self) -> Vec<LocationState> {
        let slots: Vec<Arc<TenantSlot>> = self.slots.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for slot in slots {
            if let Some(state) = slot.published.read().await.state.clone() {
                out.push(state);
            }
        }
        out.sort_by_key(|s| s.tenant_id);
        out
    }

    pub async fn attached(&self, tenant_id: TenantId) -> LocationResult<Arc<AttachedTenant>> {
        self.published(tenant_id)
            .await
            .attached
            .ok_or(LocationError::NotAttached(tenant_id))
    }

    pub async fn secondary(&self, tenant_id: TenantId) -> LocationResult<Arc<SecondaryTenant>> {
        self.published(tenant_id)
            .await
            .secondary
            .ok_or(LocationError::NotSecondary(tenant_id))
    }

    // ── Data plane and operator actions ──────────────────────────

    pub async fn read(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        key: u64,
    ) -> LocationResult<Option<Bytes>> {
        let tenant = self.attached(tenant_id).await?;
        tenant.timeline(timeline_id).await?.get(key).await
    }

    pub async fn wait_lsn(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        lsn: Lsn,
        timeout: Duration,
    ) -> LocationResult<()> {
        let tenant = self.attached(tenant_id).await?;
        tenant.timeline(timeline_id).await?.wait_lsn(lsn, timeout).await
    }

    /// Last applied lsn of every timeline of an attached tenant.
    pub async fn timeline_positions(&self, tenant_id: TenantId) -> LocationResult<BTreeMap<TimelineId, Lsn>> {
        let tenant = self.attached(tenant_id).await?;
        Ok(tenant
            .timelines()
            .await
            .iter()
            .map(|t| (t.timeline_id(), t.last_record_lsn()))
            .collect())
    }

    pub async fn timeline_detail(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
    ) -> LocationResult<TimelineDetail> {
        let tenant = self.attached(tenant_id).await?;
        Ok(tenant.timeline(timeline_id).await?.detail().await)
    }

    pub async fn list_timelines(&self, tenant_id: TenantId) -> LocationResult<Vec<TimelineDetail>> {
        let tenant = self.attached(tenant_id).await?;
        let mut out = Vec::new();
        for timeline in tenant.timelines().await {
            out.push(timeline.detail().await);
        }
        Ok(out)
    }

    pub async fn create_timeline(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
    ) -> LocationResult<TimelineDetail> {
        let tenant = self.attached(tenant_id).await?;
        Ok(tenant.create_timeline(timeline_id).await?.detail().await)
    }

    pub async fn checkpoint(&self, tenant_id: TenantId) -> LocationResult<()> {
        self.attached(tenant_id).await?.checkpoint().await
    }

    pub async fn evict_layer(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        layer: &LayerName,
    ) -> LocationResult<bool> {
        let tenant = self.attached(tenant_id).await?;
        tenant.timeline(timeline_id).await?.evict(layer).await
    }

    pub async fn upload_heatmap(&self, tenant_id: TenantId) -> LocationResult<Option<HeatmapManifest>> {
        let tenant = self.attached(tenant_id).await?;
        publish_heatmap(&tenant).await
    }

    pub async fn download_secondary(&self, tenant_id: TenantId) -> LocationResult<DownloadStats> {
        self.secondary(tenant_id).await?.download().await
    }

    async fn slot(&self, tenant_id: TenantId) -> Arc<TenantSlot> {
        if let Some(slot) = self.slots.read().await.get(&tenant_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(TenantSlot::new()))
            .clone()
    }

    async fn published(&self, tenant_id: TenantId) -> Published {
        let slot = self.slots.read().await.get(&tenant_id).cloned();
        match slot {
            Some(slot) => slot.published.read().await.clone(),
            None => Published::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TENANT, TIMELINE, TestNode};
    use crate::wal::{LogSource, WalRecord, WalService};
    use async_trait::async_trait;
    use redb::StorageBackend;
    use redb::backends::InMemoryBackend;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use strata_core::LocationModeName;
    use strata_generation::{AuthorityError, AuthorityResult, GenerationAuthority};
    use tokio::sync::watch;

    fn controller(node: &TestNode) -> LocationController {
        LocationController::new((*node.ctx).clone(), node.state.clone())
    }

    async fn wait_until_read(ctl: &LocationController, key: u64, expected: &str) {
        for _ in 0..500 {
            if let Ok(Some(value)) = ctl.read(TENANT, TIMELINE, key).await {
                if value == expected.as_bytes() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("key {key} never reached {expected}");
    }

    #[tokio::test]
    async fn attach_with_generation_of_another_node_is_rejected() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        let theirs = node.issue(NodeId(2)).await;

        let err = ctl
            .configure(TENANT, LocationConf::attached(AttachmentMode::Single, theirs))
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::FencingRejected { .. }));
        assert!(ctl.location(TENANT).await.is_none());
        assert!(node.state.get_location(NodeId(1), TENANT).unwrap().is_none());
    }

    #[tokio::test]
    async fn superseded_generation_only_admits_stale() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        let g1 = node.issue(NodeId(1)).await;
        node.issue(NodeId(2)).await;

        for mode in [AttachmentMode::Single, AttachmentMode::Multi] {
            let err = ctl.configure(TENANT, LocationConf::attached(mode, g1)).await.unwrap_err();
            assert!(matches!(err, LocationError::FencingRejected { .. }));
        }
        let state = ctl
            .configure(TENANT, LocationConf::attached(AttachmentMode::Stale, g1))
            .await
            .unwrap();
        assert_eq!(state.conf.mode.name(), LocationModeName::AttachedStale);
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn reapplying_same_conf_is_idempotent() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        let conf = LocationConf::attached(AttachmentMode::Single, node.issue(NodeId(1)).await);

        let first = ctl.configure(TENANT, conf.clone()).await.unwrap();
        let second = ctl.configure(TENANT, conf.clone()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            node.authority.latest(TENANT).await.unwrap().map(|i| i.generation),
            conf.mode.generation()
        );
        assert_eq!(
            node.state.get_location(NodeId(1), TENANT).unwrap().unwrap().conf,
            conf
        );
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn generation_cannot_go_backwards() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        let g1 = node.issue(NodeId(1)).await;
        let g2 = node.issue(NodeId(1)).await;
        ctl.configure(TENANT, LocationConf::attached(AttachmentMode::Single, g2))
            .await
            .unwrap();

        let err = ctl
            .configure(TENANT, LocationConf::attached(AttachmentMode::Stale, g1))
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::ConfigConflict(_)));
        assert_eq!(ctl.location(TENANT).await.unwrap().conf.mode.generation(), Some(g2));
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_tenant_conf_is_rejected_before_any_change() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        ctl.configure(TENANT, LocationConf::secondary(false)).await.unwrap();

        let bad = LocationConf::secondary(true)
            .with_tenant_conf(TenantConf::default().with("checkpoint_distance", "lots"));
        let err = ctl.configure(TENANT, bad).await.unwrap_err();
        assert!(matches!(err, LocationError::ConfigConflict(_)));
        assert_eq!(ctl.location(TENANT).await.unwrap().conf, LocationConf::secondary(false));
    }

    #[tokio::test]
    async fn detach_removes_durable_record() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        ctl.attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        assert!(node.state.get_location(NodeId(1), TENANT).unwrap().is_some());

        ctl.configure(TENANT, LocationConf::detached()).await.unwrap();
        assert!(ctl.location(TENANT).await.is_none());
        assert!(matches!(ctl.attached(TENANT).await, Err(LocationError::NotAttached(_))));
        assert!(node.state.get_location(NodeId(1), TENANT).unwrap().is_none());
        assert!(ctl.list_locations().await.is_empty());
    }

    #[tokio::test]
    async fn attached_data_survives_demotion_to_secondary() {
        let node = TestNode::new(1);
        node.wal.ensure_timeline(TENANT, TIMELINE).await;
        let ctl = controller(&node);
        ctl.attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        node.write_many(0..8).await;
        wait_until_read(&ctl, 7, "value-7").await;
        ctl.checkpoint(TENANT).await.unwrap();

        ctl.configure(TENANT, LocationConf::secondary(false)).await.unwrap();
        assert!(matches!(ctl.read(TENANT, TIMELINE, 1).await, Err(LocationError::NotAttached(_))));
        let secondary = ctl.secondary(TENANT).await.unwrap();
        assert!(!secondary.layer_names(TIMELINE).await.is_empty());
    }

    #[tokio::test]
    async fn restart_reattaches_only_with_latest_generation() {
        let node = TestNode::new(1);
        let ctl = controller(&node);
        const OTHER: TenantId = TenantId::from_bytes([0xcc; 16]);
        const THIRD: TenantId = TenantId::from_bytes([0xdd; 16]);

        ctl.attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        ctl.attach_with_new_generation(OTHER, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        ctl.configure(THIRD, LocationConf::secondary(true)).await.unwrap();
        ctl.shutdown().await;

        // While this node was down, OTHER moved elsewhere.
        node.authority.issue_generation(OTHER, NodeId(2)).await.unwrap();

        let restarted = controller(&node);
        let report = restarted.recover().await.unwrap();
        assert_eq!(report.attached, vec![TENANT]);
        assert_eq!(report.secondary, vec![THIRD]);
        assert_eq!(report.detached, vec![OTHER]);

        assert!(restarted.attached(TENANT).await.is_ok());
        assert!(restarted.location(OTHER).await.is_none());
        assert!(node.state.get_location(NodeId(1), OTHER).unwrap().is_none());
        restarted.shutdown().await;
    }

    /// Authority wrapper that can be switched off.
    struct FlakyAuthority {
        inner: Arc<dyn GenerationAuthority>,
        down: AtomicBool,
    }

    impl FlakyAuthority {
        fn check(&self) -> AuthorityResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AuthorityError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl GenerationAuthority for FlakyAuthority {
        async fn issue_generation(&self, tenant_id: TenantId, node_id: NodeId) -> AuthorityResult<Generation> {
            self.check()?;
            self.inner.issue_generation(tenant_id, node_id).await
        }

        async fn latest(&self, tenant_id: TenantId) -> AuthorityResult<Option<Issued>> {
            self.check()?;
            self.inner.latest(tenant_id).await
        }

        async fn confirm(
            &self,
            tenant_id: TenantId,
            node_id: NodeId,
            generation: Generation,
        ) -> AuthorityResult<GenerationStatus> {
            self.check()?;
            self.inner.confirm(tenant_id, node_id, generation).await
        }
    }

    #[tokio::test]
    async fn unreachable_authority_fails_closed() {
        let node = TestNode::new(1);
        let flaky = Arc::new(FlakyAuthority {
            inner: node.authority.clone(),
            down: AtomicBool::new(false),
        });
        let mut ctx = (*node.ctx).clone();
        ctx.authority = flaky.clone() as Arc<dyn GenerationAuthority>;
        let ctl = LocationController::new(ctx, node.state.clone());

        ctl.configure(TENANT, LocationConf::secondary(false)).await.unwrap();
        let generation = node.issue(NodeId(1)).await;

        flaky.down.store(true, Ordering::SeqCst);
        let err = ctl
            .configure(TENANT, LocationConf::attached(AttachmentMode::Single, generation))
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::AuthorityUnavailable(_)));
        assert_eq!(ctl.location(TENANT).await.unwrap().conf, LocationConf::secondary(false));

        flaky.down.store(false, Ordering::SeqCst);
        ctl.configure(TENANT, LocationConf::attached(AttachmentMode::Single, generation))
            .await
            .unwrap();
        assert!(ctl.attached(TENANT).await.is_ok());
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_tenant_are_serialized() {
        let node = TestNode::new(1);
        let ctl = Arc::new(controller(&node));
        let generation = node.issue(NodeId(1)).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let ctl = ctl.clone();
            let conf = if i % 2 == 0 {
                LocationConf::attached(AttachmentMode::Multi, generation)
            } else {
                LocationConf::secondary(i % 4 == 1)
            };
            handles.push(tokio::spawn(async move { ctl.configure(TENANT, conf).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = ctl.location(TENANT).await.unwrap();
        assert_eq!(state.health, TenantHealth::Active);
        let record = node.state.get_location(NodeId(1), TENANT).unwrap().unwrap();
        assert_eq!(record.conf, state.conf);
        assert_eq!(ctl.attached(TENANT).await.is_ok(), state.conf.mode.is_attached());
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn detached_slots_are_released() {
        let node = TestNode::new(1);
        let ctl = controller(&node);

        ctl.configure(TENANT, LocationConf::detached()).await.unwrap();
        assert!(ctl.slots.read().await.is_empty());

        ctl.attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        assert_eq!(ctl.slots.read().await.len(), 1);
        ctl.configure(TENANT, LocationConf::detached()).await.unwrap();
        assert!(ctl.slots.read().await.is_empty());

        // A rejected attach of an unknown tenant leaves nothing behind either.
        let theirs = node.issue(NodeId(2)).await;
        assert!(
            ctl.configure(TENANT, LocationConf::attached(AttachmentMode::Single, theirs))
                .await
                .is_err()
        );
        assert!(ctl.slots.read().await.is_empty());
    }

    /// Log source whose reads never return while `stuck` is set.
    struct StuckLog {
        inner: WalService,
        stuck: AtomicBool,
    }

    #[async_trait]
    impl LogSource for StuckLog {
        async fn timelines(&self, tenant_id: TenantId) -> LocationResult<Vec<TimelineId>> {
            self.inner.timelines(tenant_id).await
        }

        async fn ensure_timeline(&self, tenant_id: TenantId, timeline_id: TimelineId) -> LocationResult<()> {
            LogSource::ensure_timeline(&self.inner, tenant_id, timeline_id).await
        }

        async fn read_after(
            &self,
            tenant_id: TenantId,
            timeline_id: TimelineId,
            after: Lsn,
            limit: usize,
        ) -> LocationResult<Vec<WalRecord>> {
            if self.stuck.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.read_after(tenant_id, timeline_id, after, limit).await
        }

        async fn append_record(
            &self,
            tenant_id: TenantId,
            timeline_id: TimelineId,
            key: u64,
            value: Bytes,
        ) -> LocationResult<Lsn> {
            self.inner.append_record(tenant_id, timeline_id, key, value).await
        }

        fn subscribe(&self) -> watch::Receiver<u64> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn teardown_failure_keeps_previous_conf_until_retried() {
        let node = TestNode::new(1);
        node.wal.ensure_timeline(TENANT, TIMELINE).await;
        let log = Arc::new(StuckLog {
            inner: node.wal.clone(),
            stuck: AtomicBool::new(false),
        });
        let mut ctx = (*node.ctx).clone();
        ctx.log = log.clone() as Arc<dyn LogSource>;
        ctx.config.teardown_timeout_ms = 50;
        let ctl = LocationController::new(ctx, node.state.clone());

        let attached = ctl
            .attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        node.write(1, "one").await;
        wait_until_read(&ctl, 1, "one").await;

        log.stuck.store(true, Ordering::SeqCst);
        // Give the ingest loop time to enter a read that never returns.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = ctl
            .configure(TENANT, LocationConf::secondary(false))
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::ResourceTeardownFailure { .. }));
        let state = ctl.location(TENANT).await.unwrap();
        assert_eq!(state.conf, attached.conf);
        assert!(matches!(state.health, TenantHealth::Broken { .. }));
        assert_eq!(
            node.state.get_location(NodeId(1), TENANT).unwrap().unwrap().conf,
            attached.conf
        );

        log.stuck.store(false, Ordering::SeqCst);
        let state = ctl.configure(TENANT, LocationConf::secondary(false)).await.unwrap();
        assert_eq!(state.health, TenantHealth::Active);
        assert_eq!(state.conf, LocationConf::secondary(false));
        assert_eq!(
            node.state.get_location(NodeId(1), TENANT).unwrap().unwrap().conf,
            LocationConf::secondary(false)
        );
        ctl.shutdown().await;
    }

    /// redb backend whose writes fail while `failing` is set.
    #[derive(Debug)]
    struct FailingBackend {
        inner: InMemoryBackend,
        failing: Arc<AtomicBool>,
    }

    impl FailingBackend {
        fn check(&self) -> io::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(io::Error::other("device unavailable"));
            }
            Ok(())
        }
    }

    impl StorageBackend for FailingBackend {
        fn len(&self) -> io::Result<u64> {
            self.inner.len()
        }

        fn read(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
            self.inner.read(offset, out)
        }

        fn set_len(&self, len: u64) -> io::Result<()> {
            self.check()?;
            self.inner.set_len(len)
        }

        fn sync_data(&self) -> io::Result<()> {
            self.check()?;
            self.inner.sync_data()
        }

        fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
            self.check()?;
            self.inner.write(offset, data)
        }
    }

    #[tokio::test]
    async fn persist_failure_restarts_previous_work() {
        let node = TestNode::new(1);
        node.wal.ensure_timeline(TENANT, TIMELINE).await;
        let failing = Arc::new(AtomicBool::new(false));
        let store = StateStore::open_with_backend(FailingBackend {
            inner: InMemoryBackend::new(),
            failing: failing.clone(),
        })
        .unwrap();
        let ctl = LocationController::new((*node.ctx).clone(), store);

        let attached = ctl
            .attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
            .await
            .unwrap();
        node.write(1, "one").await;
        wait_until_read(&ctl, 1, "one").await;

        failing.store(true, Ordering::SeqCst);
        let err = ctl
            .configure(TENANT, LocationConf::secondary(true))
            .await
            .unwrap_err();
        assert!(matches!(err, LocationError::State(_)));
        let state = ctl.location(TENANT).await.unwrap();
        assert_eq!(state.conf, attached.conf);
        assert_eq!(state.health, TenantHealth::Active);
        assert!(matches!(ctl.secondary(TENANT).await, Err(LocationError::NotSecondary(_))));

        // Ingestion was stopped for the transition and is running again.
        node.write(2, "two").await;
        wait_until_read(&ctl, 2, "two").await;

        failing.store(false, Ordering::SeqCst);
        ctl.shutdown().await;
    }
}
