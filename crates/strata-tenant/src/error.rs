//! Location controller error taxonomy.

use thiserror::Error;

use strata_core::{CoreError, Generation, Lsn, TenantId};
use strata_generation::AuthorityError;
use strata_remote::RemoteError;
use strata_state::StateError;

pub type LocationResult<T> = Result<T, LocationError>;

#[derive(Debug, Error)]
pub enum LocationError {
    /// A write or attach was attempted under a generation that is not
    /// current. Never silently dropped.
    #[error("fencing rejected for tenant {tenant_id} at generation {generation}: {reason}")]
    FencingRejected {
        tenant_id: TenantId,
        generation: Generation,
        reason: String,
    },

    /// The generation authority could not be reached; nothing was changed.
    #[error("generation authority unavailable: {0}")]
    AuthorityUnavailable(String),

    /// The log source could not be reached.
    #[error("log unavailable: {0}")]
    LogUnavailable(String),

    /// The requested configuration is internally inconsistent.
    #[error("config conflict: {0}")]
    ConfigConflict(String),

    /// A background task did not stop cleanly.
    #[error("resource teardown failed for tenant {tenant_id}: {reason}")]
    ResourceTeardownFailure { tenant_id: TenantId, reason: String },

    #[error("tenant {0} is not attached on this node")]
    NotAttached(TenantId),

    #[error("tenant {0} is not a secondary on this node")]
    NotSecondary(TenantId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out waiting for lsn {lsn}, last record lsn is {last_record_lsn}")]
    WaitLsnTimeout { lsn: Lsn, last_record_lsn: Lsn },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("object store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl From<AuthorityError> for LocationError {
    fn from(e: AuthorityError) -> Self {
        // Any failure to get an answer from the authority is treated as
        // unavailability: callers fail closed.
        LocationError::AuthorityUnavailable(e.to_string())
    }
}

impl From<CoreError> for LocationError {
    fn from(e: CoreError) -> Self {
        LocationError::ConfigConflict(e.to_string())
    }
}
