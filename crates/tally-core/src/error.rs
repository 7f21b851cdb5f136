//! Error types for tally core.

use chrono::{DateTime, Utc};

use crate::ids::IdError;
use crate::run::RunStatus;
use crate::validation::ValidationError;

/// Result type for tally core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the core model.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Event failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A run status change that the lifecycle does not allow.
    #[error("invalid run transition from {} to {}", from.as_str(), to.as_str())]
    InvalidRunTransition {
        /// Current status.
        from: RunStatus,
        /// Requested status.
        to: RunStatus,
    },

    /// A time window whose start is not before its end.
    #[error("invalid window: start {start} is not before end {end}")]
    InvalidWindow {
        /// Window start.
        start: DateTime<Utc>,
        /// Window end.
        end: DateTime<Utc>,
    },
}
