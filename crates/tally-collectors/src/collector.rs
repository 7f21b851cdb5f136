//! The collector capability set.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{
    AgentId, ClientId, CollectionMetadata, CorrelationId, CycleWindow, EventId, MetricDefinition,
    MetricKey, MetricUnit, ProviderId, SourcePagination, TenantId, UsageEvent, VendorCostData,
};

use crate::error::CollectorError;

/// Declared vendor rate limits.
///
/// Collectors do not enforce these themselves; the throttle sizes each provider's
/// buckets from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    /// Sustained requests per minute.
    pub requests_per_minute: u32,
    /// Requests per hour, when the vendor caps it separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<u32>,
    /// Requests that may be issued back to back.
    pub burst_capacity: u32,
}

/// Parameters of one page fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectParams {
    /// Tenant to collect for.
    pub tenant_id: TenantId,
    /// Client to collect for.
    pub client_id: ClientId,
    /// Usage window `[start, end)`.
    pub window: CycleWindow,
    /// Cursor returned by the previous page; `None` starts from the beginning.
    pub cursor: Option<String>,
    /// Preferred page size; collectors clamp it to what the vendor accepts.
    pub page_size_hint: Option<u32>,
    /// Correlation ID of the run.
    pub correlation_id: CorrelationId,
    /// Attempt number of the run minus one.
    pub retry_count: u32,
}

/// Timing and quota information about a page fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectPerformance {
    /// Wall time spent on the page.
    pub elapsed_ms: u64,
    /// Vendor calls issued, including retries.
    pub api_call_count: u32,
    /// Remaining vendor quota, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    /// When the vendor quota resets, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
}

/// One page of canonical events.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectResult {
    /// Canonical events of the page.
    pub events: Vec<UsageEvent>,
    /// Cursor of the next page; fully encodes the position.
    pub next_cursor: Option<String>,
    /// Whether another page exists.
    pub has_more: bool,
    /// Fetch statistics.
    pub performance: CollectPerformance,
}

/// A usage source.
///
/// One implementation per provider. `collect` fetches a single page: an empty window
/// is an empty page, not an error.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Provider this collector serves.
    fn provider_id(&self) -> &ProviderId;

    /// Metrics this collector emits.
    fn metric_definitions(&self) -> Vec<MetricDefinition>;

    /// Declared vendor rate limits.
    fn rate_limits(&self) -> RateLimits;

    /// Fetch one page of usage.
    async fn collect(&self, params: &CollectParams) -> Result<CollectResult, CollectorError>;

    /// Cheap read-only probe of the provider-wide credential.
    ///
    /// Returns `Ok(false)` when the credential is missing or rejected.
    async fn validate_credentials(&self) -> Result<bool, CollectorError>;
}

/// One measured quantity of a vendor record.
#[derive(Debug, Clone)]
pub(crate) struct Measurement {
    pub event_type: String,
    pub metric_key: MetricKey,
    pub unit: MetricUnit,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub cost: VendorCostData,
    pub resource_id: String,
}

/// Everything a page shares when turning vendor records into canonical events.
pub(crate) struct PageContext<'a> {
    pub params: &'a CollectParams,
    pub provider: &'a ProviderId,
    pub collector_version: &'static str,
    pub page: u32,
    pub collected_at: DateTime<Utc>,
}

impl PageContext<'_> {
    pub fn event(&self, measurement: Measurement, agent_id: Option<AgentId>) -> UsageEvent {
        UsageEvent {
            event_id: EventId::generate(),
            provider: self.provider.clone(),
            event_type: measurement.event_type,
            metric_key: measurement.metric_key,
            unit: measurement.unit,
            quantity: measurement.quantity,
            tenant_id: self.params.tenant_id.clone(),
            client_id: self.params.client_id.clone(),
            agent_id,
            resource_id: Some(measurement.resource_id),
            event_timestamp: measurement.timestamp,
            vendor_cost_data: measurement.cost,
            collection_metadata: CollectionMetadata {
                collected_at: self.collected_at,
                collector_version: self.collector_version.to_string(),
                correlation_id: self.params.correlation_id.clone(),
                retry_count: self.params.retry_count,
                source_pagination: Some(SourcePagination {
                    page: self.page,
                    cursor: self.params.cursor.clone(),
                }),
            },
            tags: BTreeMap::new(),
            provider_data: None,
        }
    }
}

/// Clamp a page size hint to a vendor's bounds.
pub(crate) fn page_size(hint: Option<u32>, default: u32, max: u32) -> u32 {
    hint.unwrap_or(default).clamp(1, max)
}
