//! Error types for core parsing and validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while parsing identifiers or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid id {0:?}: expected 32 hex characters")]
    InvalidId(String),

    #[error("location config conflict: {0}")]
    ConfigConflict(String),

    #[error("invalid tenant setting {key}={value:?}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    #[error("duplicate layer {layer} in heatmap timeline {timeline}")]
    DuplicateHeatmapLayer { timeline: String, layer: String },
}
