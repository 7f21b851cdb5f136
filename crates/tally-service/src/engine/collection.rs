//! Collection orchestration.
//!
//! Drives a collector page by page for one provider/tenant/client/window, persisting
//! each page through the writer and checkpointing the cursor on the run record after
//! every persisted page. A failed or cancelled run is resumed from that cursor by
//! triggering the same correlation ID again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tally_collectors::{CollectParams, CollectResult, Collector, CollectorError, CollectorRegistry};
use tally_core::{
    ClientId, CollectionRun, CoreError, CorrelationId, CycleWindow, ProviderId, RunError,
    RunErrorKind, RunStatus, TenantId,
};
use tally_store::Store;
use tokio_util::sync::CancellationToken;

use super::audit::{AuditKind, AuditRecord, AuditSink};
use super::error::{EngineError, Result};
use super::writer::EventWriter;
use crate::config::EngineConfig;

/// Parameters of a collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    /// Provider to collect.
    pub provider: ProviderId,
    /// Tenant to collect for.
    pub tenant_id: TenantId,
    /// Client to collect for.
    pub client_id: ClientId,
    /// Start of the window (inclusive).
    pub window_start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub window_end: DateTime<Utc>,
    /// Caller-supplied ID shared by all attempts of this collection.
    pub correlation_id: CorrelationId,
}

impl CollectionRequest {
    /// The collection window.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidWindow` unless the window starts before it ends.
    pub fn window(&self) -> std::result::Result<CycleWindow, CoreError> {
        CycleWindow::new(self.window_start, self.window_end)
    }

    fn matches(&self, run: &CollectionRun) -> bool {
        self.provider == run.provider
            && self.tenant_id == run.tenant_id
            && self.client_id == run.client_id
            && self.window_start == run.window_start
            && self.window_end == run.window_end
    }
}

enum Prepared {
    /// The correlation ID already has a live or completed run.
    Existing(CollectionRun),
    /// A new attempt was recorded and must be executed.
    Start(CollectionRun, CancellationToken),
}

/// Page loop exit that is not an error.
enum Stop {
    Completed,
    Cancelled,
}

/// Runs collectors and tracks their runs.
pub struct CollectionEngine {
    store: Arc<dyn Store>,
    registry: Arc<CollectorRegistry>,
    writer: Arc<EventWriter>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
    active: DashMap<CorrelationId, CancellationToken>,
}

impl CollectionEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<CollectorRegistry>,
        writer: Arc<EventWriter>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            writer,
            audit,
            config,
            active: DashMap::new(),
        }
    }

    /// Start a collection in the background and return its run record.
    ///
    /// Triggering a correlation ID whose run is live or completed returns that run
    /// unchanged. A failed or cancelled run is resumed as a new attempt.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::CorrelationConflict` if the correlation ID belongs to a
    /// collection with different parameters.
    pub fn trigger(self: &Arc<Self>, request: &CollectionRequest) -> Result<CollectionRun> {
        match self.prepare(request)? {
            Prepared::Existing(run) => Ok(run),
            Prepared::Start(run, token) => {
                let engine = Arc::clone(self);
                let pending = run.clone();
                tokio::spawn(async move {
                    engine.execute(run, token).await;
                });
                Ok(pending)
            }
        }
    }

    /// Run a collection to a terminal status and return the final run record.
    ///
    /// If the correlation ID already has a live run, that run's current record is
    /// returned without waiting.
    ///
    /// # Errors
    ///
    /// Same as [`trigger`](Self::trigger).
    pub async fn run_collection(&self, request: &CollectionRequest) -> Result<CollectionRun> {
        match self.prepare(request)? {
            Prepared::Existing(run) => Ok(run),
            Prepared::Start(run, token) => Ok(self.execute(run, token).await),
        }
    }

    /// Run several collections concurrently.
    pub async fn run_batch(&self, requests: &[CollectionRequest]) -> Vec<Result<CollectionRun>> {
        join_all(requests.iter().map(|r| self.run_collection(r))).await
    }

    /// Request cancellation of a live run.
    ///
    /// The run stops before its next page and keeps its cursor. A run that has not
    /// started is cancelled at once.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RunNotFound` for an unknown correlation ID and
    /// `EngineError::RunFinished` if the latest run is terminal.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> Result<CollectionRun> {
        let run = self.latest_run(correlation_id)?;
        if run.status.is_terminal() {
            return Err(EngineError::RunFinished(correlation_id.clone()));
        }
        if let Some(token) = self.active.get(correlation_id) {
            token.cancel();
            tracing::info!(correlation_id = %correlation_id, "Cancellation requested");
            return Ok(run);
        }

        // Not driven by this process.
        let mut run = run;
        run.cancel()?;
        self.store.put_run(&run)?;
        Ok(run)
    }

    /// Latest attempt of a correlation ID.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RunNotFound` if no run exists.
    pub fn latest_run(&self, correlation_id: &CorrelationId) -> Result<CollectionRun> {
        self.store
            .latest_run(correlation_id)?
            .ok_or_else(|| EngineError::RunNotFound(correlation_id.clone()))
    }

    /// All attempts of a correlation ID, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RunNotFound` if no run exists.
    pub fn attempts(&self, correlation_id: &CorrelationId) -> Result<Vec<CollectionRun>> {
        let runs = self.store.runs_for_correlation(correlation_id)?;
        if runs.is_empty() {
            return Err(EngineError::RunNotFound(correlation_id.clone()));
        }
        Ok(runs)
    }

    /// Number of runs driven by this process right now.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    fn prepare(&self, request: &CollectionRequest) -> Result<Prepared> {
        let window = request.window()?;

        // The entry guard serialises concurrent triggers of one correlation ID.
        let slot = match self.active.entry(request.correlation_id.clone()) {
            Entry::Occupied(_) => {
                return Ok(Prepared::Existing(self.latest_run(&request.correlation_id)?));
            }
            Entry::Vacant(slot) => slot,
        };

        let run = match self.store.latest_run(&request.correlation_id)? {
            Some(previous) if !request.matches(&previous) => {
                return Err(EngineError::CorrelationConflict(
                    request.correlation_id.clone(),
                ));
            }
            Some(previous) if previous.status == RunStatus::Completed => {
                return Ok(Prepared::Existing(previous));
            }
            Some(mut previous) => {
                if !previous.status.is_terminal() {
                    tracing::warn!(
                        correlation_id = %previous.correlation_id,
                        run_id = %previous.run_id,
                        "Failing orphaned run before resuming"
                    );
                    previous.fail(RunError {
                        kind: RunErrorKind::TransientProviderError,
                        message: "run was interrupted".into(),
                        retry_after_secs: None,
                    })?;
                    self.store.put_run(&previous)?;
                }
                CollectionRun::resume(&previous)?
            }
            None => CollectionRun::new(
                request.correlation_id.clone(),
                request.provider.clone(),
                request.tenant_id.clone(),
                request.client_id.clone(),
                window,
            ),
        };

        self.store.put_run(&run)?;
        let token = CancellationToken::new();
        slot.insert(token.clone());
        Ok(Prepared::Start(run, token))
    }

    async fn execute(&self, mut run: CollectionRun, token: CancellationToken) -> CollectionRun {
        let started = Instant::now();

        match self.drive(&mut run, &token).await {
            Ok(Stop::Completed) => {
                if let Err(e) = run.complete() {
                    tracing::error!(run_id = %run.run_id, error = %e, "Run completion rejected");
                }
            }
            Ok(Stop::Cancelled) => {
                if let Err(e) = run.cancel() {
                    tracing::error!(run_id = %run.run_id, error = %e, "Run cancellation rejected");
                }
            }
            Err(error) => {
                tracing::warn!(
                    correlation_id = %run.correlation_id,
                    provider = %run.provider,
                    attempt = run.attempt,
                    error = %error,
                    "Collection run failed"
                );
                let retry_after_secs = match &error {
                    EngineError::Collector(CollectorError::RateLimited { retry_after }) => {
                        Some(retry_after.as_secs())
                    }
                    _ => None,
                };
                let detail = RunError {
                    kind: error.run_error_kind(),
                    message: error.to_string(),
                    retry_after_secs,
                };
                if let Err(e) = run.fail(detail) {
                    tracing::error!(run_id = %run.run_id, error = %e, "Run failure rejected");
                }
            }
        }

        if let Err(e) = self.store.put_run(&run) {
            tracing::error!(
                run_id = %run.run_id,
                correlation_id = %run.correlation_id,
                error = %e,
                "Failed to persist final run record"
            );
        }
        self.active.remove(&run.correlation_id);

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.audit.record(&AuditRecord::collection(
            AuditKind::CollectionFinished,
            &run,
            duration_ms,
        ));
        tracing::info!(
            correlation_id = %run.correlation_id,
            provider = %run.provider,
            status = run.status.as_str(),
            pages = run.pages_fetched,
            processed = run.events_processed,
            duplicates = run.events_duplicate,
            quarantined = run.events_failed,
            duration_ms,
            "Collection run finished"
        );
        run
    }

    async fn drive(&self, run: &mut CollectionRun, token: &CancellationToken) -> Result<Stop> {
        if token.is_cancelled() {
            return Ok(Stop::Cancelled);
        }
        run.start()?;
        self.store
            .put_run(run)
            .map_err(|e| EngineError::persistence(&run.correlation_id, &e))?;
        self.audit
            .record(&AuditRecord::collection(AuditKind::CollectionStarted, run, 0));

        let collector = self.registry.get(&run.provider)?;
        let window = run.window();

        loop {
            if token.is_cancelled() {
                return Ok(Stop::Cancelled);
            }

            let params = CollectParams {
                tenant_id: run.tenant_id.clone(),
                client_id: run.client_id.clone(),
                window,
                cursor: run.cursor.clone(),
                page_size_hint: self.config.page_size,
                correlation_id: run.correlation_id.clone(),
                retry_count: run.retry_count(),
            };
            let Some(page) = self.fetch_page(collector.as_ref(), &params, token).await? else {
                return Ok(Stop::Cancelled);
            };

            run.pages_fetched += 1;
            run.api_calls += u64::from(page.performance.api_call_count);
            run.events_collected += page.events.len() as u64;

            let written = self.writer.bulk_create(page.events, &run.correlation_id)?;
            run.events_processed += written.persisted;
            run.events_duplicate += written.duplicates;
            run.events_failed += written.quarantined;

            if !page.has_more || page.next_cursor.is_none() {
                run.cursor = None;
                return Ok(Stop::Completed);
            }
            run.cursor = page.next_cursor;
            self.store
                .put_run(run)
                .map_err(|e| EngineError::persistence(&run.correlation_id, &e))?;
            tracing::debug!(
                correlation_id = %run.correlation_id,
                pages = run.pages_fetched,
                "Page checkpointed"
            );
        }
    }

    /// Fetch one page, retrying transient failures with capped exponential backoff
    /// and rate limits after the provider's delay.
    ///
    /// Returns `None` if the run was cancelled while waiting to retry.
    async fn fetch_page(
        &self,
        collector: &dyn Collector,
        params: &CollectParams,
        token: &CancellationToken,
    ) -> Result<Option<CollectResult>> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            // Vendor calls carry their own timeout, started after the throttle wait.
            let error = match collector.collect(params).await {
                Ok(page) => return Ok(Some(page)),
                Err(error) => error,
            };

            let delay = match &error {
                CollectorError::Transient(_) => {
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    delay
                }
                CollectorError::RateLimited { retry_after }
                    if *retry_after <= self.config.max_retry_after =>
                {
                    *retry_after
                }
                _ => return Err(error.into()),
            };

            if attempt >= self.config.page_attempts {
                tracing::warn!(
                    provider = %collector.provider_id(),
                    correlation_id = %params.correlation_id,
                    attempts = attempt,
                    error = %error,
                    "Page fetch failed after max retries"
                );
                return Err(error.into());
            }

            tracing::debug!(
                provider = %collector.provider_id(),
                correlation_id = %params.correlation_id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying page fetch"
            );
            if !sleep_unless_cancelled(delay, token).await {
                return Ok(None);
            }
        }
    }
}

/// Returns `false` if the token fired first.
async fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::audit::MemoryAudit;
    use crate::engine::idempotency::IdempotencyManager;
    use crate::engine::testing::{catalog, retell_event, FailingInserts};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tally_collectors::{CollectPerformance, ProviderThrottle, RateLimits};
    use tally_core::{MetricDefinition, MetricKey, MetricUnit};
    use tally_store::MemoryStore;
    use tokio::sync::Notify;

    type Step = std::result::Result<CollectResult, CollectorError>;

    /// Collector replaying a fixed sequence of pages and errors.
    struct Scripted {
        provider: ProviderId,
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(Option<String>, u32)>>,
        gate: Mutex<Option<Arc<Notify>>>,
        stall: Option<Duration>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                provider: ProviderId::new("retell").unwrap(),
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
                gate: Mutex::new(None),
                stall: None,
            }
        }

        fn push(&self, step: Step) {
            self.steps.lock().unwrap().push_back(step);
        }

        fn calls(&self) -> Vec<(Option<String>, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Collector for Scripted {
        fn provider_id(&self) -> &ProviderId {
            &self.provider
        }

        fn metric_definitions(&self) -> Vec<MetricDefinition> {
            vec![MetricDefinition::new(
                MetricKey::new("retell.call_minutes").unwrap(),
                MetricUnit::Minute,
                "Call minutes",
            )]
        }

        fn rate_limits(&self) -> RateLimits {
            RateLimits {
                requests_per_minute: 600,
                requests_per_hour: None,
                burst_capacity: 10,
            }
        }

        async fn collect(&self, params: &CollectParams) -> Step {
            self.calls
                .lock()
                .unwrap()
                .push((params.cursor.clone(), params.retry_count));
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            self.steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CollectorError::Permanent("script exhausted".into())))
        }

        async fn validate_credentials(&self) -> std::result::Result<bool, CollectorError> {
            Ok(true)
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> Step {
        Ok(CollectResult {
            events: ids.iter().map(|id| retell_event(id, "1")).collect(),
            next_cursor: next.map(str::to_string),
            has_more: next.is_some(),
            performance: CollectPerformance {
                api_call_count: 1,
                ..CollectPerformance::default()
            },
        })
    }

    fn request(correlation_id: &str) -> CollectionRequest {
        CollectionRequest {
            provider: ProviderId::new("retell").unwrap(),
            tenant_id: TenantId::new("t1").unwrap(),
            client_id: ClientId::new("c1").unwrap(),
            window_start: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
            correlation_id: CorrelationId::new(correlation_id).unwrap(),
        }
    }

    struct Fixture {
        engine: Arc<CollectionEngine>,
        store: Arc<dyn Store>,
        audit: Arc<MemoryAudit>,
    }

    fn fixture(collector: Arc<Scripted>, store: Arc<dyn Store>) -> Fixture {
        let mut registry = CollectorRegistry::new(Arc::new(ProviderThrottle::new()));
        registry.register(collector);
        let writer = EventWriter::new(
            Arc::clone(&store),
            Arc::new(IdempotencyManager::new(Duration::from_secs(48 * 3600))),
            catalog(),
        );
        let audit = Arc::new(MemoryAudit::new());
        let engine = CollectionEngine::new(
            Arc::clone(&store),
            Arc::new(registry),
            Arc::new(writer),
            audit.clone(),
            EngineConfig::default(),
        );
        Fixture {
            engine: Arc::new(engine),
            store,
            audit,
        }
    }

    fn stored_events(store: &Arc<dyn Store>) -> usize {
        let window = request("x").window().unwrap();
        store
            .events_in_window(&TenantId::new("t1").unwrap(), None, &window)
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn pages_are_persisted_and_checkpointed() {
        let collector = Arc::new(Scripted::new(vec![
            page(&["call_a", "call_b"], Some("p2")),
            page(&["call_c"], None),
        ]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let run = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.pages_fetched, 2);
        assert_eq!(run.api_calls, 2);
        assert_eq!(run.events_collected, 3);
        assert_eq!(run.events_processed, 3);
        assert!(run.cursor.is_none());
        assert_eq!(
            collector.calls(),
            vec![(None, 0), (Some("p2".to_string()), 0)]
        );
        assert_eq!(stored_events(&fx.store), 3);

        let kinds: Vec<AuditKind> = fx.audit.records().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![AuditKind::CollectionStarted, AuditKind::CollectionFinished]
        );
    }

    #[tokio::test]
    async fn completed_run_is_returned_unchanged() {
        let collector = Arc::new(Scripted::new(vec![page(&["call_a"], None)]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let first = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        let second = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(collector.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_run_resumes_from_its_cursor() {
        let collector = Arc::new(Scripted::new(vec![
            page(&["call_a"], Some("p2")),
            Err(CollectorError::AuthenticationFailure("key revoked".into())),
        ]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let first = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(first.status, RunStatus::Failed);
        let error = first.error.clone().unwrap();
        assert_eq!(error.kind, RunErrorKind::AuthenticationFailure);
        assert_eq!(first.cursor.as_deref(), Some("p2"));
        // Auth failures are not retried.
        assert_eq!(collector.calls().len(), 2);

        collector.push(page(&["call_b"], None));
        let second = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.resumed_from, Some(first.run_id));
        assert_eq!(collector.calls()[2], (Some("p2".to_string()), 1));
        assert_eq!(stored_events(&fx.store), 2);

        let attempts = fx.engine.attempts(&request("corr-1").correlation_id).unwrap();
        assert_eq!(attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let collector = Arc::new(Scripted::new(vec![
            Err(CollectorError::Transient("connection reset".into())),
            Err(CollectorError::Transient("502".into())),
            page(&["call_a"], None),
        ]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let run = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(collector.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_the_attempts() {
        let collector = Arc::new(Scripted::new(vec![
            Err(CollectorError::Transient("503".into())),
            Err(CollectorError::Transient("503".into())),
            Err(CollectorError::Transient("503".into())),
            page(&["call_a"], None),
        ]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let run = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.error.unwrap().kind,
            RunErrorKind::TransientProviderError
        );
        assert_eq!(collector.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_wait_for_retry_after() {
        let collector = Arc::new(Scripted::new(vec![
            Err(CollectorError::RateLimited {
                retry_after: Duration::from_secs(7),
            }),
            page(&["call_a"], None),
        ]));
        let fx = fixture(collector, Arc::new(MemoryStore::new()));

        let started = tokio::time::Instant::now();
        let run = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn excessive_retry_after_fails_the_run() {
        let collector = Arc::new(Scripted::new(vec![Err(CollectorError::RateLimited {
            retry_after: Duration::from_secs(3600),
        })]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let run = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        let error = run.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::RateLimited);
        assert_eq!(error.retry_after_secs, Some(3600));
        assert_eq!(collector.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queueing_behind_the_provider_bucket_is_not_a_failure() {
        // The collector spends longer than the call timeout waiting for a slot.
        let mut collector = Scripted::new(vec![
            page(&["call_a"], Some("p2")),
            page(&["call_b"], None),
        ]);
        collector.stall = Some(EngineConfig::default().call_timeout * 3);
        let collector = Arc::new(collector);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let fx = fixture(collector.clone(), store.clone());

        let run = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error.is_none());
        assert_eq!(run.events_processed, 2);
        assert_eq!(collector.calls().len(), 2);
        assert_eq!(stored_events(&store), 2);
    }

    #[tokio::test]
    async fn unknown_provider_fails_the_run() {
        let fx = fixture(Arc::new(Scripted::new(vec![])), Arc::new(MemoryStore::new()));
        let request = CollectionRequest {
            provider: ProviderId::new("twilio").unwrap(),
            ..request("corr-1")
        };

        let run = fx.engine.run_collection(&request).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().kind, RunErrorKind::UnknownProvider);
    }

    #[tokio::test]
    async fn write_failure_keeps_the_cursor() {
        let collector = Arc::new(Scripted::new(vec![page(&["call_a"], Some("p2"))]));
        let fx = fixture(collector, Arc::new(FailingInserts::default()));

        let run = fx.engine.run_collection(&request("corr-9")).await.unwrap();
        let error = run.error.clone().unwrap();
        assert_eq!(error.kind, RunErrorKind::PersistenceFailure);
        assert!(error.message.contains("corr-9"));
        assert!(run.cursor.is_none());
    }

    #[tokio::test]
    async fn reused_correlation_id_with_other_parameters_conflicts() {
        let collector = Arc::new(Scripted::new(vec![page(&["call_a"], None)]));
        let fx = fixture(collector, Arc::new(MemoryStore::new()));
        fx.engine.run_collection(&request("corr-1")).await.unwrap();

        let other = CollectionRequest {
            client_id: ClientId::new("c2").unwrap(),
            ..request("corr-1")
        };
        assert!(matches!(
            fx.engine.run_collection(&other).await,
            Err(EngineError::CorrelationConflict(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_run_stops_between_pages_and_resumes() {
        let collector = Scripted::new(vec![
            page(&["call_a", "call_b"], Some("p2")),
            page(&["call_c"], None),
        ]);
        let gate = Arc::new(Notify::new());
        *collector.gate.lock().unwrap() = Some(gate.clone());
        let collector = Arc::new(collector);
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));
        let corr = request("corr-1").correlation_id;

        fx.engine.trigger(&request("corr-1")).unwrap();
        while collector.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        fx.engine.cancel(&corr).unwrap();
        gate.notify_one();
        while fx.engine.active_runs() > 0 {
            tokio::task::yield_now().await;
        }

        let cancelled = fx.engine.latest_run(&corr).unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert_eq!(cancelled.cursor.as_deref(), Some("p2"));
        assert_eq!(cancelled.events_processed, 2);
        assert!(matches!(
            fx.engine.cancel(&corr),
            Err(EngineError::RunFinished(_))
        ));

        let resumed = fx.engine.run_collection(&request("corr-1")).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Completed);
        assert_eq!(resumed.events_processed, 1);
        assert_eq!(stored_events(&fx.store), 3);
    }

    #[tokio::test]
    async fn orphaned_run_is_failed_and_resumed() {
        let collector = Arc::new(Scripted::new(vec![page(&["call_b"], None)]));
        let fx = fixture(collector.clone(), Arc::new(MemoryStore::new()));

        let req = request("corr-1");
        let mut orphan = CollectionRun::new(
            req.correlation_id.clone(),
            req.provider.clone(),
            req.tenant_id.clone(),
            req.client_id.clone(),
            req.window().unwrap(),
        );
        orphan.start().unwrap();
        orphan.cursor = Some("p2".into());
        fx.store.put_run(&orphan).unwrap();

        let run = fx.engine.run_collection(&req).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.attempt, 2);
        assert_eq!(collector.calls()[0].0.as_deref(), Some("p2"));

        let attempts = fx.engine.attempts(&req.correlation_id).unwrap();
        assert_eq!(attempts[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_not_found() {
        let fx = fixture(Arc::new(Scripted::new(vec![])), Arc::new(MemoryStore::new()));
        let corr = CorrelationId::new("nope").unwrap();
        assert!(matches!(
            fx.engine.latest_run(&corr),
            Err(EngineError::RunNotFound(_))
        ));
        assert!(matches!(
            fx.engine.cancel(&corr),
            Err(EngineError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_runs_each_request() {
        let collector = Arc::new(Scripted::new(vec![
            page(&["call_a"], None),
            page(&["call_b"], None),
        ]));
        let fx = fixture(collector, Arc::new(MemoryStore::new()));

        let results = fx
            .engine
            .run_batch(&[request("corr-1"), request("corr-2")])
            .await;
        assert!(results
            .iter()
            .all(|r| r.as_ref().is_ok_and(|run| run.status == RunStatus::Completed)));
        assert_eq!(stored_events(&fx.store), 2);
    }
}
