//! Error taxonomy for provider collectors.

use std::time::Duration;

use tally_core::RunErrorKind;

/// Errors a collector reports.
///
/// Authentication failures, transient failures and permanent failures are kept
/// distinct so the orchestrator can decide what to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectorError {
    /// Network error, timeout or 5xx. Safe to retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider answered 429.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Delay the provider asked for.
        retry_after: Duration,
    },

    /// Credentials are missing or were rejected (401/403).
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// The provider rejected the request or returned an unreadable payload.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// No collector is registered for the provider.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The collector is misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CollectorError {
    /// Whether retrying the same call can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Run failure category for this error.
    #[must_use]
    pub const fn run_error_kind(&self) -> RunErrorKind {
        match self {
            Self::Transient(_) => RunErrorKind::TransientProviderError,
            Self::RateLimited { .. } => RunErrorKind::RateLimited,
            Self::AuthenticationFailure(_) => RunErrorKind::AuthenticationFailure,
            Self::Permanent(_) | Self::Configuration(_) => RunErrorKind::PermanentProviderError,
            Self::UnknownProvider(_) => RunErrorKind::UnknownProvider,
        }
    }
}
