//! Client error types.

/// Errors that can occur when using the tally client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// No run exists for the correlation ID.
    #[error("not found: {message}")]
    NotFound {
        /// Server message.
        message: String,
    },

    /// The correlation ID is used by another collection, or the run already finished.
    #[error("conflict: {message}")]
    Conflict {
        /// Server message.
        message: String,
    },

    /// The service could not persist a batch; resend it with the same correlation ID.
    #[error("persistence failure for correlation {correlation_id}")]
    PersistenceFailure {
        /// Correlation ID to replay.
        correlation_id: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
