//! Migration executor — applies planned steps to the two nodes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use strata_core::{AttachmentMode, LocationConf, TenantId};
use strata_generation::GenerationAuthority;

use crate::error::{MigrationError, MigrationResult};
use crate::node::LocationNode;
use crate::plan::{MigrationStep, Observed, next_step};

/// Upper bound on steps in one `run`; a healthy migration needs seven.
const MAX_STEPS: usize = 16;

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// How long step 5 waits for the destination to catch up.
    pub catch_up_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            catch_up_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct Migration {
    tenant_id: TenantId,
    source: Arc<dyn LocationNode>,
    destination: Arc<dyn LocationNode>,
    authority: Arc<dyn GenerationAuthority>,
    config: MigrationConfig,
    caught_up: bool,
}

impl Migration {
    pub fn new(
        tenant_id: TenantId,
        source: Arc<dyn LocationNode>,
        destination: Arc<dyn LocationNode>,
        authority: Arc<dyn GenerationAuthority>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            tenant_id,
            source,
            destination,
            authority,
            config,
            caught_up: false,
        }
    }

    pub async fn observe(&self) -> MigrationResult<Observed> {
        Ok(Observed {
            source: self.source.location_conf(self.tenant_id).await,
            destination: self.destination.location_conf(self.tenant_id).await,
            destination_node: self.destination.node_id(),
            latest: self.authority.latest(self.tenant_id).await?,
        })
    }

    /// Execute exactly one step and return it.
    pub async fn step(&mut self) -> MigrationResult<MigrationStep> {
        let observed = self.observe().await?;
        let step = next_step(&observed, self.caught_up)
            .ok_or(MigrationError::SourceNotAttached(self.tenant_id))?;
        let tenant_id = self.tenant_id;
        let tenant_conf = observed.source.tenant_conf.clone();
        debug!(%tenant_id, ?step, "migration step starting");

        match step {
            MigrationStep::WarmDestination => {
                let warm = LocationConf::secondary(true).with_tenant_conf(tenant_conf);
                self.destination.configure(tenant_id, warm).await?;
                // Prefetching only shortens the handover; failures are not fatal.
                if let Err(e) = self.source.upload_heatmap(tenant_id).await {
                    warn!(%tenant_id, error = %e, "heatmap upload before migration failed");
                }
                if let Err(e) = self.destination.download_secondary(tenant_id).await {
                    warn!(%tenant_id, error = %e, "secondary prefetch before migration failed");
                }
            }
            MigrationStep::DemoteSource { generation } => {
                let stale = LocationConf::attached(AttachmentMode::Stale, generation).with_tenant_conf(tenant_conf);
                self.source.configure(tenant_id, stale).await?;
            }
            MigrationStep::AttachDestination { generation } => {
                let generation = match generation {
                    Some(generation) => generation,
                    None => {
                        self.authority
                            .issue_generation(tenant_id, self.destination.node_id())
                            .await?
                    }
                };
                let multi = LocationConf::attached(AttachmentMode::Multi, generation).with_tenant_conf(tenant_conf);
                self.destination.configure(tenant_id, multi).await?;
                self.caught_up = false;
            }
            MigrationStep::CatchUp => {
                self.wait_for_catch_up().await?;
                self.caught_up = true;
            }
            MigrationStep::ReleaseSource => {
                let warm = LocationConf::secondary(true).with_tenant_conf(tenant_conf);
                self.source.configure(tenant_id, warm).await?;
            }
            MigrationStep::PromoteDestination { generation } => {
                let single = LocationConf::attached(AttachmentMode::Single, generation)
                    .with_tenant_conf(observed.destination.tenant_conf);
                self.destination.configure(tenant_id, single).await?;
            }
            MigrationStep::Done => {}
        }

        info!(
            %tenant_id, source = %self.source.node_id(), destination = %self.destination.node_id(),
            ?step, "migration step complete"
        );
        Ok(step)
    }

    /// Run steps until the destination is the single attached location.
    pub async fn run(&mut self) -> MigrationResult<()> {
        for _ in 0..MAX_STEPS {
            if self.step().await? == MigrationStep::Done {
                return Ok(());
            }
        }
        Err(MigrationError::NoProgress {
            tenant_id: self.tenant_id,
            steps: MAX_STEPS,
        })
    }

    /// Give up: the destination goes back to a warm secondary. A source
    /// left stale is re-attached under a fresh generation, since its old
    /// one may have been superseded by the destination's.
    pub async fn abort(&mut self) -> MigrationResult<()> {
        let tenant_id = self.tenant_id;
        let observed = self.observe().await?;

        if let Some((AttachmentMode::Stale, _)) = observed.source.mode.attachment() {
            let generation = self
                .authority
                .issue_generation(tenant_id, self.source.node_id())
                .await?;
            let single = LocationConf::attached(AttachmentMode::Single, generation)
                .with_tenant_conf(observed.source.tenant_conf.clone());
            self.source.configure(tenant_id, single).await?;
        }

        let warm = LocationConf::secondary(true).with_tenant_conf(observed.destination.tenant_conf);
        self.destination.configure(tenant_id, warm).await?;
        self.caught_up = false;
        warn!(
            %tenant_id, source = %self.source.node_id(), destination = %self.destination.node_id(),
            "migration aborted"
        );
        Ok(())
    }

    /// Poll until every source timeline is matched on the destination. The
    /// target positions are captured once, when the wait begins.
    async fn wait_for_catch_up(&self) -> MigrationResult<()> {
        let tenant_id = self.tenant_id;
        let target = self.source.timeline_positions(tenant_id).await?;
        let deadline = tokio::time::Instant::now() + self.config.catch_up_timeout;

        loop {
            let have = self.destination.timeline_positions(tenant_id).await?;
            let lagging = target.iter().find_map(|(timeline_id, want)| {
                let at = have.get(timeline_id).copied().unwrap_or_default();
                (at < *want).then_some((*timeline_id, at, *want))
            });
            let Some((timeline_id, at, want)) = lagging else {
                debug!(%tenant_id, timelines = target.len(), "destination caught up");
                return Ok(());
            };
            if tokio::time::Instant::now() >= deadline {
                return Err(MigrationError::CatchUpTimeout {
                    tenant_id,
                    timeline_id,
                    destination: at,
                    source_lsn: want,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
