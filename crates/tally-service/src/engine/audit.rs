//! Audit boundary.
//!
//! One record per collection run start and end, and one per aggregation run. Records
//! carry counts and identifiers only, never vendor payloads or credentials.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{CollectionRun, CorrelationId, ProviderId, TenantId};

/// What an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A collection run started.
    CollectionStarted,
    /// A collection run reached a terminal status.
    CollectionFinished,
    /// An aggregation run finished.
    Aggregation,
}

/// One structured audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Record kind.
    pub kind: AuditKind,
    /// Correlation ID of the run, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Provider collected, for collection records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    /// Tenant.
    pub tenant_id: TenantId,
    /// Events produced by the collector.
    pub events_collected: u64,
    /// Events folded into aggregates.
    pub events_aggregated: u64,
    /// Run duration.
    pub duration_ms: u64,
    /// Run status or `started`.
    pub outcome: String,
    /// When the record was emitted.
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Record of a collection run, at start or end depending on `kind`.
    #[must_use]
    pub fn collection(kind: AuditKind, run: &CollectionRun, duration_ms: u64) -> Self {
        Self {
            kind,
            correlation_id: Some(run.correlation_id.clone()),
            provider: Some(run.provider.clone()),
            tenant_id: run.tenant_id.clone(),
            events_collected: run.events_collected,
            events_aggregated: 0,
            duration_ms,
            outcome: run.status.as_str().to_string(),
            recorded_at: Utc::now(),
        }
    }
}

/// Where audit records go.
pub trait AuditSink: Send + Sync {
    /// Emit one record. Must not fail the caller.
    fn record(&self, record: &AuditRecord);
}

/// Audit sink writing to the `tally::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            target: "tally::audit",
            kind = ?record.kind,
            correlation_id = record.correlation_id.as_ref().map(CorrelationId::as_str),
            provider = record.provider.as_ref().map(ProviderId::as_str),
            tenant_id = %record.tenant_id,
            events_collected = record.events_collected,
            events_aggregated = record.events_aggregated,
            duration_ms = record.duration_ms,
            outcome = %record.outcome,
            "audit"
        );
    }
}

/// Audit sink keeping records in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, record: &AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
