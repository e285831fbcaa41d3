//! Log source — where attached timelines ingest records from.
//!
//! The real log service is an external collaborator; `WalService` is the
//! in-process log hosted by the control plane node (and used directly by
//! tests). Clients append records to it and every attached location of the
//! tenant ingests the same stream, which is what lets two attached nodes
//! serve identical data mid-migration. Nodes without the log reach it over
//! the management API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tracing::debug;

use strata_core::{Lsn, TenantId, TimelineId};

use crate::error::{LocationError, LocationResult};

/// One log record: a new value for `key` at `lsn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub key: u64,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// Timelines the log knows about for a tenant.
    async fn timelines(&self, tenant_id: TenantId) -> LocationResult<Vec<TimelineId>>;

    /// Create the timeline's log if it does not exist yet.
    async fn ensure_timeline(&self, tenant_id: TenantId, timeline_id: TimelineId) -> LocationResult<()>;

    /// Up to `limit` records with `lsn > after`, in lsn order.
    async fn read_after(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        after: Lsn,
        limit: usize,
    ) -> LocationResult<Vec<WalRecord>>;

    /// Append a record and return its lsn.
    async fn append_record(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        key: u64,
        value: Bytes,
    ) -> LocationResult<Lsn>;

    /// Notified (value bumped) whenever any record is appended.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// In-process append-only log.
#[derive(Clone)]
pub struct WalService {
    logs: Arc<RwLock<HashMap<(TenantId, TimelineId), Vec<WalRecord>>>>,
    appended: Arc<watch::Sender<u64>>,
}

impl Default for WalService {
    fn default() -> Self {
        Self::new()
    }
}

impl WalService {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            logs: Arc::new(RwLock::new(HashMap::new())),
            appended: Arc::new(appended),
        }
    }

    /// Create the timeline's log if it does not exist yet.
    pub async fn ensure_timeline(&self, tenant_id: TenantId, timeline_id: TimelineId) {
        self.logs
            .write()
            .await
            .entry((tenant_id, timeline_id))
            .or_default();
    }

    /// Append a record and return its lsn. Lsns start at 1.
    pub async fn append(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        key: u64,
        value: impl Into<Bytes>,
    ) -> Lsn {
        let lsn = {
            let mut logs = self.logs.write().await;
            let log = logs.entry((tenant_id, timeline_id)).or_default();
            let lsn = Lsn(log.len() as u64 + 1);
            log.push(WalRecord {
                lsn,
                key,
                value: value.into().to_vec(),
            });
            lsn
        };
        self.appended.send_modify(|v| *v += 1);
        debug!(%tenant_id, %timeline_id, %lsn, key, "record appended");
        lsn
    }
}

#[async_trait]
impl LogSource for WalService {
    async fn timelines(&self, tenant_id: TenantId) -> LocationResult<Vec<TimelineId>> {
        let logs = self.logs.read().await;
        let mut out: Vec<TimelineId> = logs
            .keys()
            .filter(|(t, _)| *t == tenant_id)
            .map(|(_, tl)| *tl)
            .collect();
        out.sort();
        Ok(out)
    }

    async fn ensure_timeline(&self, tenant_id: TenantId, timeline_id: TimelineId) -> LocationResult<()> {
        WalService::ensure_timeline(self, tenant_id, timeline_id).await;
        Ok(())
    }

    async fn read_after(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        after: Lsn,
        limit: usize,
    ) -> LocationResult<Vec<WalRecord>> {
        let logs = self.logs.read().await;
        let log = logs
            .get(&(tenant_id, timeline_id))
            .ok_or_else(|| LocationError::NotFound(format!("log for {tenant_id}/{timeline_id}")))?;
        // Record at index i has lsn i + 1.
        let start = (after.0 as usize).min(log.len());
        Ok(log[start..].iter().take(limit).cloned().collect())
    }

    async fn append_record(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        key: u64,
        value: Bytes,
    ) -> LocationResult<Lsn> {
        Ok(WalService::append(self, tenant_id, timeline_id, key, value).await)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}
