//! Log hosted by the control plane node.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::IgnoredAny;
use tokio::sync::watch;

use strata_api::handlers::{AppendRequest, AppendResponse};
use strata_core::{Lsn, TenantId, TimelineId};
use strata_tenant::{LocationError, LocationResult, LogSource, WalRecord};

use crate::{ClientError, ControlPlaneClient};

/// `LogSource` answered by a remote node's `/wal` routes.
///
/// Only appends made through this client bump [`LogSource::subscribe`];
/// records appended elsewhere are picked up by the ingest poll.
#[derive(Debug)]
pub struct HttpLogSource {
    client: ControlPlaneClient,
    appended: watch::Sender<u64>,
}

impl HttpLogSource {
    pub fn new(client: ControlPlaneClient) -> Self {
        let (appended, _) = watch::channel(0);
        Self { client, appended }
    }
}

fn log_path(tenant_id: TenantId, timeline_id: TimelineId) -> String {
    format!("/v1/tenant/{tenant_id}/timeline/{timeline_id}/wal")
}

fn log_error(e: ClientError) -> LocationError {
    if e.is_not_found() {
        LocationError::NotFound(e.to_string())
    } else {
        LocationError::LogUnavailable(e.to_string())
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn timelines(&self, tenant_id: TenantId) -> LocationResult<Vec<TimelineId>> {
        self.client
            .get(&format!("/v1/tenant/{tenant_id}/wal"))
            .await
            .map_err(log_error)
    }

    async fn ensure_timeline(&self, tenant_id: TenantId, timeline_id: TimelineId) -> LocationResult<()> {
        let _: IgnoredAny = self
            .client
            .put(&log_path(tenant_id, timeline_id))
            .await
            .map_err(log_error)?;
        Ok(())
    }

    async fn read_after(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        after: Lsn,
        limit: usize,
    ) -> LocationResult<Vec<WalRecord>> {
        let path = format!("{}?after={}&limit={limit}", log_path(tenant_id, timeline_id), after.0);
        self.client.get(&path).await.map_err(log_error)
    }

    async fn append_record(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
        key: u64,
        value: Bytes,
    ) -> LocationResult<Lsn> {
        let req = AppendRequest {
            key,
            value: value.to_vec(),
        };
        let resp: AppendResponse = self
            .client
            .post(&log_path(tenant_id, timeline_id), &req)
            .await
            .map_err(log_error)?;
        self.appended.send_modify(|n| *n += 1);
        Ok(resp.lsn)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}
