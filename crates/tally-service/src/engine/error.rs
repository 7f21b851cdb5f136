//! Engine error types.

use tally_collectors::CollectorError;
use tally_core::{CoreError, CorrelationId, GroupKey, RunErrorKind};
use tally_store::StoreError;

/// Errors raised by the collection and aggregation engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A collector call failed.
    #[error(transparent)]
    Collector(#[from] CollectorError),

    /// Writing a batch failed; the batch can be replayed by correlation ID.
    #[error("persistence failure for correlation {correlation_id}: {message}")]
    PersistenceFailure {
        /// Correlation ID of the failed batch.
        correlation_id: CorrelationId,
        /// Store error.
        message: String,
    },

    /// A storage read failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A model invariant was violated.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No run exists for the correlation ID.
    #[error("no collection run for correlation {0}")]
    RunNotFound(CorrelationId),

    /// The correlation ID is already used by a run with different parameters.
    #[error("correlation {0} is already used by a different collection")]
    CorrelationConflict(CorrelationId),

    /// The run already reached a terminal status.
    #[error("collection run for correlation {0} already finished")]
    RunFinished(CorrelationId),

    /// A group's events carry more than one currency.
    #[error("group {provider}/{metric_key} mixes currencies {first} and {second}")]
    MixedCurrency {
        /// Provider of the group.
        provider: String,
        /// Metric of the group.
        metric_key: String,
        /// First currency seen.
        first: String,
        /// Conflicting currency.
        second: String,
    },
}

impl EngineError {
    /// Wrap a store error raised while persisting a batch.
    #[must_use]
    pub fn persistence(correlation_id: &CorrelationId, error: &StoreError) -> Self {
        Self::PersistenceFailure {
            correlation_id: correlation_id.clone(),
            message: error.to_string(),
        }
    }

    pub(crate) fn mixed_currency(group: &GroupKey, first: &str, second: &str) -> Self {
        Self::MixedCurrency {
            provider: group.provider.to_string(),
            metric_key: group.metric_key.to_string(),
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    /// Run failure category for this error.
    #[must_use]
    pub fn run_error_kind(&self) -> RunErrorKind {
        match self {
            Self::Collector(e) => e.run_error_kind(),
            _ => RunErrorKind::PersistenceFailure,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
