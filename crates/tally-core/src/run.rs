//! Collection run records.
//!
//! A [`CollectionRun`] is the operational record of one attempt to collect from one
//! provider for one tenant/client/window. Runs move `pending → running →
//! completed | failed | cancelled` and never leave a terminal state; a retry is a new
//! attempt sharing the correlation ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::{ClientId, CorrelationId, CycleWindow, ProviderId, RunId, TenantId};

/// Status of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not started.
    Pending,
    /// Fetching pages.
    Running,
    /// All pages fetched and persisted.
    Completed,
    /// Stopped by an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl RunStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a run may move from this status to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled | Self::Failed)
                | (
                    Self::Running,
                    Self::Completed | Self::Failed | Self::Cancelled
                )
        )
    }

    /// Get the status name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Category of a run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Network error, timeout or 5xx after the retry budget was spent.
    TransientProviderError,
    /// The provider kept answering 429 after the retry budget was spent.
    RateLimited,
    /// Credentials were rejected; not retried until rotated.
    AuthenticationFailure,
    /// The provider rejected the request or returned an unreadable payload.
    PermanentProviderError,
    /// No collector is registered for the provider.
    UnknownProvider,
    /// Persisting a batch failed; the batch can be replayed by correlation ID.
    PersistenceFailure,
}

/// Error detail recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    /// Failure category.
    pub kind: RunErrorKind,
    /// Human-readable message, free of credentials and vendor payloads.
    pub message: String,
    /// Provider-requested delay before retrying, for rate-limited runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// One attempt to collect usage from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRun {
    /// Unique ID of this attempt.
    pub run_id: RunId,
    /// Caller-supplied correlation ID, shared by all attempts.
    pub correlation_id: CorrelationId,
    /// Provider being collected.
    pub provider: ProviderId,
    /// Tenant being collected.
    pub tenant_id: TenantId,
    /// Client being collected.
    pub client_id: ClientId,
    /// Start of the collection window (inclusive).
    pub window_start: DateTime<Utc>,
    /// End of the collection window (exclusive).
    pub window_end: DateTime<Utc>,
    /// Current status.
    pub status: RunStatus,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Previous attempt this one resumes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<RunId>,
    /// Canonical events produced by the collector.
    pub events_collected: u64,
    /// Events newly persisted.
    pub events_processed: u64,
    /// Events dropped as already seen.
    pub events_duplicate: u64,
    /// Events quarantined by validation.
    pub events_failed: u64,
    /// Pages fetched.
    pub pages_fetched: u64,
    /// Vendor API calls issued.
    pub api_calls: u64,
    /// Cursor of the next page to fetch; checkpointed after every persisted page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Failure detail for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run started fetching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CollectionRun {
    /// Create a pending first attempt.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        provider: ProviderId,
        tenant_id: TenantId,
        client_id: ClientId,
        window: CycleWindow,
    ) -> Self {
        Self {
            run_id: RunId::generate(),
            correlation_id,
            provider,
            tenant_id,
            client_id,
            window_start: window.start,
            window_end: window.end,
            status: RunStatus::Pending,
            attempt: 1,
            resumed_from: None,
            events_collected: 0,
            events_processed: 0,
            events_duplicate: 0,
            events_failed: 0,
            pages_fetched: 0,
            api_calls: 0,
            cursor: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Create a pending attempt that resumes a failed or cancelled run from its cursor.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRunTransition` if `previous` is not failed or
    /// cancelled.
    pub fn resume(previous: &Self) -> Result<Self, CoreError> {
        if !matches!(previous.status, RunStatus::Failed | RunStatus::Cancelled) {
            return Err(CoreError::InvalidRunTransition {
                from: previous.status,
                to: RunStatus::Pending,
            });
        }
        Ok(Self {
            run_id: RunId::generate(),
            status: RunStatus::Pending,
            attempt: previous.attempt + 1,
            resumed_from: Some(previous.run_id),
            events_collected: 0,
            events_processed: 0,
            events_duplicate: 0,
            events_failed: 0,
            pages_fetched: 0,
            api_calls: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            ..previous.clone()
        })
    }

    /// The collection window.
    #[must_use]
    pub fn window(&self) -> CycleWindow {
        CycleWindow {
            start: self.window_start,
            end: self.window_end,
        }
    }

    /// Number of retries before this attempt.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }

    /// Move to `running`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRunTransition` if the run is not pending.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Move to `completed`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRunTransition` if the run is not running.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.transition(RunStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Move to `failed` with an error detail.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRunTransition` if the run is already terminal.
    pub fn fail(&mut self, error: RunError) -> Result<(), CoreError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Move to `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRunTransition` if the run is already terminal.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(RunStatus::Cancelled)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidRunTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
