//! Authority error types.

use thiserror::Error;

pub type AuthorityResult<T> = Result<T, AuthorityError>;

#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The authority could not be reached. Callers fail closed.
    #[error("generation authority unavailable: {0}")]
    Unavailable(String),

    #[error("authority state error: {0}")]
    State(#[from] strata_state::StateError),
}
