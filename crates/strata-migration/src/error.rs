use thiserror::Error;

use strata_core::{Lsn, TenantId, TimelineId};
use strata_generation::AuthorityError;
use strata_tenant::LocationError;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The destination did not reach the source's position in time. Both
    /// nodes stay attached; the wait can be retried or the migration aborted.
    #[error(
        "destination of tenant {tenant_id} did not catch up on timeline {timeline_id}: at {destination}, need {source_lsn}"
    )]
    CatchUpTimeout {
        tenant_id: TenantId,
        timeline_id: TimelineId,
        destination: Lsn,
        source_lsn: Lsn,
    },

    #[error("tenant {0} is not attached on the source node")]
    SourceNotAttached(TenantId),

    #[error("migration of tenant {tenant_id} made no progress after {steps} steps")]
    NoProgress { tenant_id: TenantId, steps: usize },

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}
