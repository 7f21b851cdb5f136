//! Event store writer.
//!
//! Validates canonical events, quarantines the invalid ones, drops already-seen ones
//! and bulk-inserts the rest with set-or-ignore semantics.

use std::sync::Arc;

use serde::Serialize;
use tally_core::{
    parse_wire_event, validate_event, CorrelationId, MetricCatalog, QuarantinedEvent, UsageEvent,
};
use tally_store::Store;

use super::error::{EngineError, Result};
use super::idempotency::IdempotencyManager;

/// Counts of one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    /// Events newly persisted.
    pub persisted: u64,
    /// Events dropped by the seen-set or ignored by the store.
    pub duplicates: u64,
    /// Events quarantined by validation.
    pub quarantined: u64,
}

/// Persists canonical events.
pub struct EventWriter {
    store: Arc<dyn Store>,
    idempotency: Arc<IdempotencyManager>,
    catalog: MetricCatalog,
}

impl EventWriter {
    /// Create a writer validating against `catalog`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        idempotency: Arc<IdempotencyManager>,
        catalog: MetricCatalog,
    ) -> Self {
        Self {
            store,
            idempotency,
            catalog,
        }
    }

    /// The metric catalog events are validated against.
    #[must_use]
    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    /// Validate and persist a batch.
    ///
    /// Dedup conflicts are silent. Invalid events are quarantined and counted.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PersistenceFailure` carrying `correlation_id` if the store
    /// rejects the batch; nothing from the batch is then recorded as seen.
    pub fn bulk_create(
        &self,
        events: Vec<UsageEvent>,
        correlation_id: &CorrelationId,
    ) -> Result<WriteOutcome> {
        let mut valid = Vec::with_capacity(events.len());
        let mut rejected = Vec::new();
        for event in events {
            match validate_event(&event, &self.catalog) {
                Ok(()) => valid.push(event),
                Err(error) => {
                    tracing::debug!(
                        correlation_id = %correlation_id,
                        provider = %event.provider,
                        metric_key = %event.metric_key,
                        reason = %error,
                        "Quarantining invalid event"
                    );
                    rejected.push(QuarantinedEvent::from_event(&event, &error));
                }
            }
        }

        self.persist(valid, rejected, correlation_id)
    }

    /// Parse wire-format payloads and persist them.
    ///
    /// Payloads that do not match the canonical schema are quarantined as-is.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PersistenceFailure` if the store rejects the batch.
    pub fn ingest(
        &self,
        payloads: Vec<serde_json::Value>,
        correlation_id: &CorrelationId,
    ) -> Result<WriteOutcome> {
        let mut events = Vec::with_capacity(payloads.len());
        let mut rejected = Vec::new();
        for payload in payloads {
            match parse_wire_event(payload.clone()) {
                Ok(event) => match validate_event(&event, &self.catalog) {
                    Ok(()) => events.push(event),
                    Err(error) => rejected.push(QuarantinedEvent::from_event(&event, &error)),
                },
                Err(error) => rejected.push(QuarantinedEvent::from_payload(
                    payload,
                    Some(correlation_id.clone()),
                    &error,
                )),
            }
        }

        self.persist(events, rejected, correlation_id)
    }

    fn persist(
        &self,
        valid: Vec<UsageEvent>,
        rejected: Vec<QuarantinedEvent>,
        correlation_id: &CorrelationId,
    ) -> Result<WriteOutcome> {
        if !rejected.is_empty() {
            self.store
                .put_quarantined(&rejected)
                .map_err(|e| EngineError::persistence(correlation_id, &e))?;
        }

        let partition = self.idempotency.partition(valid);
        let inserted = self
            .store
            .insert_events(&partition.fresh)
            .map_err(|e| EngineError::persistence(correlation_id, &e))?;
        self.idempotency.mark_seen(&partition.fresh);

        let outcome = WriteOutcome {
            persisted: inserted.inserted as u64,
            duplicates: (partition.duplicates + inserted.duplicates) as u64,
            quarantined: rejected.len() as u64,
        };
        tracing::debug!(
            correlation_id = %correlation_id,
            persisted = outcome.persisted,
            duplicates = outcome.duplicates,
            quarantined = outcome.quarantined,
            "Batch written"
        );
        Ok(outcome)
    }
}
