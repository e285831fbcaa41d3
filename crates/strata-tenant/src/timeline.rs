//! Timeline — one append-only history of an attached tenant.
//!
//! Records arrive from the log source into an open in-memory layer. Once it
//! holds `checkpoint_distance` records it is frozen into an immutable layer,
//! which is uploaded under the attachment's generation unless the attachment
//! is stale. After uploading, the timeline asks the authority whether its
//! generation is still current before publishing a new index: a superseded
//! node never advances the remote consistent lsn.
//!
//! Reads consult the open layer, then frozen layers newest first. Evicted
//! layers are downloaded again on demand.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use strata_core::{Generation, HeatmapLayer, HeatmapTimeline, Lsn, TenantId, TimelineId, epoch_secs};
use strata_remote::paths;

use crate::context::NodeContext;
use crate::error::{LocationError, LocationResult};
use crate::index::{IndexLayer, IndexPart};
use crate::layer::{LayerFile, LayerName, LayerStore};
use crate::tenant::Attachment;
use crate::wal::WalRecord;

struct LayerEntry {
    size: u64,
    resident: Option<Arc<LayerFile>>,
    /// Generation the layer was uploaded under, once uploaded.
    remote_generation: Option<Generation>,
    last_access: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    pub name: LayerName,
    pub size: u64,
    pub resident: bool,
    pub remote_generation: Option<Generation>,
    pub last_access: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineDetail {
    pub timeline_id: TimelineId,
    pub last_record_lsn: Lsn,
    pub disk_consistent_lsn: Lsn,
    pub remote_consistent_lsn: Lsn,
    pub layers: Vec<LayerInfo>,
}

pub struct Timeline {
    tenant_id: TenantId,
    timeline_id: TimelineId,
    ctx: Arc<NodeContext>,
    attachment: watch::Receiver<Attachment>,
    checkpoint_distance: AtomicUsize,
    layers: RwLock<BTreeMap<LayerName, LayerEntry>>,
    open: Mutex<Vec<WalRecord>>,
    last_record_lsn: watch::Sender<Lsn>,
    disk_consistent_lsn: AtomicU64,
    remote_consistent_lsn: AtomicU64,
    upload_lock: Mutex<()>,
}

impl Timeline {
    /// Build a timeline from its remote index. Local layer files listed in
    /// the index are adopted as resident; anything else local is ignored and
    /// re-derived from the log.
    pub(crate) fn new(
        tenant_id: TenantId,
        timeline_id: TimelineId,
        ctx: Arc<NodeContext>,
        attachment: watch::Receiver<Attachment>,
        checkpoint_distance: usize,
        index: Option<IndexPart>,
        mut local: BTreeMap<LayerName, Arc<LayerFile>>,
    ) -> Self {
        let now = epoch_secs();
        let mut layers = BTreeMap::new();
        let mut consistent = Lsn::INVALID;
        if let Some(index) = index {
            consistent = index.disk_consistent_lsn;
            for (name, layer) in index.layers {
                let resident = local.remove(&name);
                layers.insert(
                    name,
                    LayerEntry {
                        size: layer.size,
                        resident,
                        remote_generation: Some(layer.generation),
                        last_access: now,
                    },
                );
            }
        }
        let (last_record_lsn, _) = watch::channel(consistent);

        Self {
            tenant_id,
            timeline_id,
            ctx,
            attachment,
            checkpoint_distance: AtomicUsize::new(checkpoint_distance.max(1)),
            layers: RwLock::new(layers),
            open: Mutex::new(Vec::new()),
            last_record_lsn,
            disk_consistent_lsn: AtomicU64::new(consistent.0),
            remote_consistent_lsn: AtomicU64::new(consistent.0),
            upload_lock: Mutex::new(()),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }

    pub fn last_record_lsn(&self) -> Lsn {
        *self.last_record_lsn.borrow()
    }

    pub fn disk_consistent_lsn(&self) -> Lsn {
        Lsn(self.disk_consistent_lsn.load(Ordering::Acquire))
    }

    pub fn remote_consistent_lsn(&self) -> Lsn {
        Lsn(self.remote_consistent_lsn.load(Ordering::Acquire))
    }

    pub(crate) fn set_checkpoint_distance(&self, distance: usize) {
        self.checkpoint_distance.store(distance.max(1), Ordering::Release);
    }

    /// Apply records from the log. Records at or below the last applied lsn
    /// are skipped. Freezes and uploads each time the open layer fills up;
    /// a failed upload does not stop the remaining records from applying.
    pub(crate) async fn ingest(&self, records: Vec<WalRecord>) -> LocationResult<()> {
        let mut records = records.into_iter().peekable();
        let mut first_error = None;

        while records.peek().is_some() {
            let should_freeze = {
                let mut open = self.open.lock().await;
                let distance = self.checkpoint_distance.load(Ordering::Acquire);
                let mut last = self.last_record_lsn();
                while open.len() < distance {
                    let Some(record) = records.next() else { break };
                    if record.lsn > last {
                        last = record.lsn;
                        open.push(record);
                    }
                }
                self.last_record_lsn.send_if_modified(|lsn| {
                    let advanced = last > *lsn;
                    *lsn = last;
                    advanced
                });
                open.len() >= distance
            };

            if should_freeze {
                let result = match self.freeze().await {
                    Ok(_) => self.upload_pending().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Freeze whatever is open and upload everything not yet uploaded.
    pub async fn checkpoint(&self) -> LocationResult<()> {
        self.freeze().await?;
        self.upload_pending().await
    }

    /// Wait until records up to `lsn` have been applied.
    pub async fn wait_lsn(&self, lsn: Lsn, timeout: Duration) -> LocationResult<()> {
        let mut rx = self.last_record_lsn.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|last| *last >= lsn)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(LocationError::WaitLsnTimeout {
                lsn,
                last_record_lsn: self.last_record_lsn(),
            }),
        }
    }

    /// Newest value for `key`.
    pub async fn get(&self, key: u64) -> LocationResult<Option<Bytes>> {
        {
            let open = self.open.lock().await;
            if let Some(record) = open.iter().rev().find(|r| r.key == key) {
                return Ok(Some(Bytes::copy_from_slice(&record.value)));
            }
        }

        let names: Vec<LayerName> = self.layers.read().await.keys().rev().cloned().collect();
        for name in names {
            let file = self.load_layer(&name).await?;
            if let Some(value) = file.get(key) {
                return Ok(Some(Bytes::copy_from_slice(value)));
            }
        }
        Ok(None)
    }

    pub async fn detail(&self) -> TimelineDetail {
        let layers = self
            .layers
            .read()
            .await
            .iter()
            .map(|(name, entry)| LayerInfo {
                name: name.clone(),
                size: entry.size,
                resident: entry.resident.is_some(),
                remote_generation: entry.remote_generation,
                last_access: entry.last_access,
            })
            .collect();
        TimelineDetail {
            timeline_id: self.timeline_id,
            last_record_lsn: self.last_record_lsn(),
            disk_consistent_lsn: self.disk_consistent_lsn(),
            remote_consistent_lsn: self.remote_consistent_lsn(),
            layers,
        }
    }

    /// Uploaded layers, hottest first.
    pub(crate) async fn heatmap(&self) -> HeatmapTimeline {
        let mut layers: Vec<HeatmapLayer> = self
            .layers
            .read()
            .await
            .iter()
            .filter_map(|(name, entry)| {
                entry.remote_generation.map(|generation| HeatmapLayer {
                    name: name.to_string(),
                    size: entry.size,
                    generation,
                    last_access_hint: entry.last_access,
                })
            })
            .collect();
        // Newer layers break ties so recent data is fetched first.
        layers.sort_by(|a, b| {
            b.last_access_hint
                .cmp(&a.last_access_hint)
                .then_with(|| b.name.cmp(&a.name))
        });
        HeatmapTimeline {
            timeline_id: self.timeline_id,
            layers,
        }
    }

    /// Resident layer files, handed over when the location becomes a
    /// secondary.
    pub(crate) async fn resident_layers(&self) -> BTreeMap<LayerName, Arc<LayerFile>> {
        self.layers
            .read()
            .await
            .iter()
            .filter_map(|(name, entry)| entry.resident.clone().map(|f| (name.clone(), f)))
            .collect()
    }

    async fn freeze(&self) -> LocationResult<Option<LayerName>> {
        let mut open = self.open.lock().await;
        let Some(file) = LayerFile::from_records(std::mem::take(&mut *open)) else {
            return Ok(None);
        };
        let name = file.name();
        let size = file.encode()?.len() as u64;
        let end_lsn = file.end_lsn;

        // Insert while still holding the open layer so readers never see the
        // records in neither place.
        self.layers.write().await.insert(
            name.clone(),
            LayerEntry {
                size,
                resident: Some(Arc::new(file)),
                remote_generation: None,
                last_access: epoch_secs(),
            },
        );
        self.disk_consistent_lsn.store(end_lsn.0, Ordering::Release);
        drop(open);

        debug!(
            tenant_id = %self.tenant_id, timeline_id = %self.timeline_id,
            layer = %name, size, "froze layer"
        );
        Ok(Some(name))
    }

    async fn upload_pending(&self) -> LocationResult<()> {
        let _guard = self.upload_lock.lock().await;
        let Attachment { mode, generation } = *self.attachment.borrow();
        if !mode.remote_writes() {
            debug!(
                tenant_id = %self.tenant_id, timeline_id = %self.timeline_id,
                "attachment is stale, skipping uploads"
            );
            return Ok(());
        }

        let pending: Vec<(LayerName, Arc<LayerFile>)> = self
            .layers
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.remote_generation.is_none())
            .filter_map(|(name, entry)| entry.resident.clone().map(|f| (name.clone(), f)))
            .collect();

        if pending.is_empty() && self.remote_consistent_lsn() >= self.disk_consistent_lsn() {
            return Ok(());
        }

        for (name, file) in pending {
            let path = paths::layer_path(self.tenant_id, self.timeline_id, name.as_str(), generation);
            self.ctx.remote.put_object(&path, file.encode()?).await?;
            if let Some(entry) = self.layers.write().await.get_mut(&name) {
                entry.remote_generation = Some(generation);
            }
            debug!(
                tenant_id = %self.tenant_id, timeline_id = %self.timeline_id,
                layer = %name, %generation, "uploaded layer"
            );
        }

        self.upload_index(generation).await
    }

    async fn upload_index(&self, generation: Generation) -> LocationResult<()> {
        let current = self
            .ctx
            .authority
            .validate(self.tenant_id, self.ctx.node_id, generation)
            .await?;
        if !current {
            warn!(
                tenant_id = %self.tenant_id, timeline_id = %self.timeline_id, %generation,
                "dropped remote consistent lsn update: generation is no longer current"
            );
            return Err(LocationError::FencingRejected {
                tenant_id: self.tenant_id,
                generation,
                reason: "generation superseded, index not published".into(),
            });
        }

        let index = {
            let layers = self.layers.read().await;
            IndexPart::new(
                layers
                    .iter()
                    .filter_map(|(name, entry)| {
                        entry.remote_generation.map(|generation| {
                            (
                                name.clone(),
                                IndexLayer {
                                    size: entry.size,
                                    generation,
                                },
                            )
                        })
                    })
                    .collect(),
            )
        };
        let path = paths::index_path(self.tenant_id, self.timeline_id, generation);
        self.ctx.remote.put_object(&path, index.encode()?).await?;
        self.remote_consistent_lsn
            .fetch_max(index.disk_consistent_lsn.0, Ordering::AcqRel);

        info!(
            tenant_id = %self.tenant_id, timeline_id = %self.timeline_id, %generation,
            remote_consistent_lsn = %index.disk_consistent_lsn, layers = index.layers.len(),
            "published index"
        );
        Ok(())
    }

    async fn load_layer(&self, name: &LayerName) -> LocationResult<Arc<LayerFile>> {
        {
            let mut layers = self.layers.write().await;
            let entry = layers
                .get_mut(name)
                .ok_or_else(|| LocationError::NotFound(format!("layer {name}")))?;
            entry.last_access = epoch_secs();
            if let Some(file) = &entry.resident {
                return Ok(file.clone());
            }
        }

        let file = Arc::new(LayerFile::decode(&self.fetch(name).await?)?);
        if let Some(entry) = self.layers.write().await.get_mut(name) {
            entry.resident = Some(file.clone());
        }
        info!(
            tenant_id = %self.tenant_id, timeline_id = %self.timeline_id,
            layer = %name, "downloaded evicted layer on demand"
        );
        Ok(file)
    }
}

#[async_trait]
impl LayerStore for Timeline {
    async fn list_local(&self) -> Vec<LayerName> {
        self.layers
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.resident.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    async fn evict(&self, name: &LayerName) -> LocationResult<bool> {
        let mut layers = self.layers.write().await;
        let entry = layers
            .get_mut(name)
            .ok_or_else(|| LocationError::NotFound(format!("layer {name}")))?;
        if entry.remote_generation.is_none() || entry.resident.is_none() {
            return Ok(false);
        }
        entry.resident = None;
        debug!(tenant_id = %self.tenant_id, timeline_id = %self.timeline_id, layer = %name, "evicted layer");
        Ok(true)
    }

    async fn fetch(&self, name: &LayerName) -> LocationResult<Bytes> {
        let generation = self
            .layers
            .read()
            .await
            .get(name)
            .and_then(|entry| entry.remote_generation)
            .ok_or_else(|| LocationError::NotFound(format!("layer {name} is not uploaded")))?;
        let path = paths::layer_path(self.tenant_id, self.timeline_id, name.as_str(), generation);
        Ok(self.ctx.remote.get_object(&path).await?)
    }
}
