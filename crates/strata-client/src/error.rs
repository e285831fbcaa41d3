//! Control plane client errors.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach control plane at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("control plane request {path} timed out")]
    Timeout { path: String },

    #[error("control plane request {path} failed: {reason}")]
    Request { path: String, reason: String },

    /// The node answered with a non-2xx status.
    #[error("control plane answered {status} for {path}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("undecodable control plane response for {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Status { status: 404, .. })
    }
}
