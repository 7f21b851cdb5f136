//! Billing-cycle aggregate types.
//!
//! A [`CycleAggregate`] is derived data: it is replaced wholesale every time the
//! aggregation engine runs for its scope key and can always be recomputed from the
//! persisted events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::{AgentId, ClientId, MetricKey, MetricUnit, ProviderId, TenantId, UsageEvent};

/// A half-open billing cycle window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end; also the cycle's close time.
    pub end: DateTime<Utc>,
}

impl CycleWindow {
    /// Create a window.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidWindow` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CoreError> {
        if start >= end {
            return Err(CoreError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whether a timestamp falls inside the window.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Grouping key of an aggregate within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    /// Tenant.
    pub tenant_id: TenantId,
    /// Client.
    pub client_id: ClientId,
    /// Agent, when events were attributed to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Provider.
    pub provider: ProviderId,
    /// Metric.
    pub metric_key: MetricKey,
}

impl GroupKey {
    /// The group an event belongs to.
    #[must_use]
    pub fn of(event: &UsageEvent) -> Self {
        Self {
            tenant_id: event.tenant_id.clone(),
            client_id: event.client_id.clone(),
            agent_id: event.agent_id.clone(),
            provider: event.provider.clone(),
            metric_key: event.metric_key.clone(),
        }
    }
}

/// Derived summary of one group's usage over one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleAggregate {
    /// Group the aggregate covers.
    #[serde(flatten)]
    pub group: GroupKey,
    /// Cycle the aggregate covers.
    pub cycle_start: DateTime<Utc>,
    /// End of the cycle (exclusive).
    pub cycle_end: DateTime<Utc>,
    /// Unit of `total_quantity`, when any event was aggregated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<MetricUnit>,
    /// Currency of `total_cost`, when any event was aggregated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Sum of event quantities.
    pub total_quantity: Decimal,
    /// Sum of event total costs.
    pub total_cost: Decimal,
    /// Number of aggregated events.
    pub event_count: u64,
    /// Unit-cost statistics.
    pub cost_breakdown: CostBreakdown,
    /// Data-quality signals.
    pub quality_metrics: QualityMetrics,
    /// When the aggregate was computed.
    pub aggregated_at: DateTime<Utc>,
}

impl CycleAggregate {
    /// The aggregate's cycle window.
    #[must_use]
    pub fn window(&self) -> CycleWindow {
        CycleWindow {
            start: self.cycle_start,
            end: self.cycle_end,
        }
    }

    /// Compare two aggregates ignoring `aggregated_at`.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            aggregated_at: other.aggregated_at,
            ..self.clone()
        } == *other
    }
}

/// Descriptive statistics over each event's effective unit cost.
///
/// Zero-quantity events are excluded here but still counted in the aggregate totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    /// Mean unit cost.
    pub avg_unit_cost: Option<Decimal>,
    /// Minimum unit cost.
    pub min_unit_cost: Option<Decimal>,
    /// Maximum unit cost.
    pub max_unit_cost: Option<Decimal>,
    /// Population variance of unit costs.
    pub variance: Option<Decimal>,
    /// Number of events the statistics were computed over.
    pub sample_count: u64,
}

/// Data-quality signals of an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    /// Observed events relative to the expected count, in `[0, 1]`.
    pub completeness_score: Decimal,
    /// Events timestamped in the cycle but collected after it closed.
    pub late_events_count: u64,
    /// Events of this group excluded because they failed validation.
    pub quarantined_events_count: u64,
    /// Rule-based anomaly flags, sorted and without duplicates.
    pub anomaly_flags: Vec<AnomalyFlag>,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            completeness_score: Decimal::ONE,
            late_events_count: 0,
            quarantined_events_count: 0,
            anomaly_flags: Vec::new(),
        }
    }
}

/// Anomaly raised by the reconciliation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyFlag {
    /// Quantity far above the trailing average of the group.
    HighUsageSpike,
    /// Cost far from the trailing average of the group.
    CostAnomaly,
    /// Too many of the group's events were quarantined.
    MissingEvents,
    /// Distinct vendor resources with identical timestamp, quantity and cost.
    DuplicateSuspected,
}

impl AnomalyFlag {
    /// Get the flag name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HighUsageSpike => "high_usage_spike",
            Self::CostAnomaly => "cost_anomaly",
            Self::MissingEvents => "missing_events",
            Self::DuplicateSuspected => "duplicate_suspected",
        }
    }
}
