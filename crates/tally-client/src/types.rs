//! Request and response types of the tally API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{
    ClientId, CollectionRun, CorrelationId, CycleAggregate, GroupKey, ProviderId, TenantId,
    UsageEvent,
};

/// What to collect.
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
    /// Correlation ID shared by every attempt of this collection.
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Serialize)]
pub(crate) struct TriggerBody<'a> {
    #[serde(flatten)]
    pub collection: &'a CollectionRequest,
    pub wait: bool,
}

/// Scope of an aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    /// Tenant to aggregate.
    pub tenant_id: TenantId,
    /// Client to aggregate; all clients when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Start of the cycle (inclusive).
    pub cycle_start: DateTime<Utc>,
    /// End of the cycle (exclusive).
    pub cycle_end: DateTime<Utc>,
    /// Correlation ID recorded in the audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// A group the aggregation engine skipped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupFailure {
    /// The group.
    pub group: GroupKey,
    /// Why it failed.
    pub error: String,
}

/// Result of an aggregation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    /// Aggregates written.
    pub aggregates: Vec<CycleAggregate>,
    /// Events folded into the aggregates.
    pub events_aggregated: u64,
    /// Groups left untouched because of an error.
    pub failed_groups: Vec<GroupFailure>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IngestBody<'a> {
    pub correlation_id: &'a CorrelationId,
    pub events: &'a [UsageEvent],
}

/// Counts of an ingested batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Batch correlation ID.
    pub correlation_id: CorrelationId,
    /// Events newly persisted.
    pub persisted: u64,
    /// Events already seen.
    pub duplicates: u64,
    /// Events quarantined by validation.
    pub quarantined: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProviderHealthResponse {
    pub providers: BTreeMap<ProviderId, bool>,
}

/// API error response.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// One run per provider for the same tenant/client/window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCollectionRequest {
    /// Tenant to collect for.
    pub tenant_id: TenantId,
    /// Client to collect for.
    pub client_id: ClientId,
    /// Start of the window (inclusive).
    pub window_start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub window_end: DateTime<Utc>,
    /// Base correlation ID; each provider's run uses `<base>:<provider>`.
    pub correlation_id: CorrelationId,
    /// Providers to collect; every registered provider when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderId>,
    /// Wait for every run to finish.
    pub wait: bool,
}

/// A provider whose batch run was not started.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchError {
    /// Provider.
    pub provider: ProviderId,
    /// Reason.
    pub message: String,
}

/// Result of a batch trigger.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchCollectionResponse {
    /// Started or existing runs.
    pub runs: Vec<CollectionRun>,
    /// Providers that were rejected.
    pub errors: Vec<BatchError>,
}
