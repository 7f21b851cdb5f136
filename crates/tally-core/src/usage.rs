//! Canonical usage event types.
//!
//! A [`UsageEvent`] is one vendor-reported unit of consumption, normalized by a provider
//! collector. Events are immutable once persisted: corrections are new offsetting events,
//! never edits.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, ClientId, CorrelationId, EventId, MetricKey, ProviderId, TenantId};

/// A canonical usage event.
///
/// The JSON form of this type is the canonical wire schema. Fields outside the
/// documented extension points (`tags`, `providerData`) are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UsageEvent {
    /// Unique event ID, generated at normalization time.
    pub event_id: EventId,

    /// Provider that reported the usage.
    pub provider: ProviderId,

    /// Vendor-specific event type (e.g. `phone_call`, `generation`).
    pub event_type: String,

    /// Canonical metric key (e.g. `retell.call_minutes`).
    pub metric_key: MetricKey,

    /// Unit the quantity is expressed in.
    pub unit: MetricUnit,

    /// Quantity consumed. Never negative.
    pub quantity: Decimal,

    /// Tenant the usage is attributed to.
    pub tenant_id: TenantId,

    /// Client (within the tenant) the usage is attributed to.
    pub client_id: ClientId,

    /// Internal agent, when the vendor record can be mapped to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    /// The vendor's own identifier for the billable resource (e.g. a call ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// When the usage occurred, per the vendor.
    pub event_timestamp: DateTime<Utc>,

    /// Cost as captured at collection time.
    pub vendor_cost_data: VendorCostData,

    /// Provenance of the event.
    pub collection_metadata: CollectionMetadata,

    /// Free-form string tags (extension point).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Provider-specific structured data (extension point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<serde_json::Value>,
}

impl UsageEvent {
    /// Attribute the event to an internal agent.
    #[must_use]
    pub fn with_agent(mut self, agent_id: Option<AgentId>) -> Self {
        self.agent_id = agent_id;
        self
    }

    /// Set the vendor resource identifier used for deduplication.
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Attach provider-specific data.
    #[must_use]
    pub fn with_provider_data(mut self, data: serde_json::Value) -> Self {
        self.provider_data = Some(data);
        self
    }

    /// Effective unit cost (`totalCost / quantity`), or `None` for zero-quantity events.
    #[must_use]
    pub fn effective_unit_cost(&self) -> Option<Decimal> {
        if self.quantity.is_zero() {
            None
        } else {
            self.vendor_cost_data
                .total_cost
                .checked_div(self.quantity)
        }
    }
}

/// Unit a metric is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    /// Minutes of connected time.
    Minute,
    /// Seconds of connected time.
    Second,
    /// LLM tokens.
    Token,
    /// Messages (SMS, chat).
    Message,
    /// API requests.
    Request,
    /// Characters (e.g. text-to-speech input).
    Character,
}

impl MetricUnit {
    /// Get the unit name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Token => "token",
            Self::Message => "message",
            Self::Request => "request",
            Self::Character => "character",
        }
    }
}

/// Vendor cost captured when the event was collected.
///
/// This is never recomputed later, so price changes do not alter historical events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VendorCostData {
    /// Cost of one unit of the metric.
    pub unit_cost: Decimal,
    /// ISO 4217 currency code as reported by the vendor.
    pub currency: String,
    /// Total cost of the event.
    pub total_cost: Decimal,
    /// When the cost was captured.
    pub cost_captured_at: DateTime<Utc>,
    /// Vendor pricing tier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_tier: Option<String>,
}

impl VendorCostData {
    /// Cost data from a per-unit price: `totalCost = unitCost × quantity`.
    #[must_use]
    pub fn from_unit_cost(
        unit_cost: Decimal,
        quantity: Decimal,
        currency: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            unit_cost,
            currency: currency.into(),
            total_cost: unit_cost * quantity,
            cost_captured_at: captured_at,
            pricing_tier: None,
        }
    }

    /// Cost data from a vendor-reported total: `unitCost = totalCost / quantity`.
    ///
    /// Zero-quantity records keep their total and report a zero unit cost.
    #[must_use]
    pub fn from_total_cost(
        total_cost: Decimal,
        quantity: Decimal,
        currency: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let unit_cost = if quantity.is_zero() {
            Decimal::ZERO
        } else {
            total_cost.checked_div(quantity).unwrap_or(Decimal::ZERO)
        };
        Self {
            unit_cost,
            currency: currency.into(),
            total_cost,
            cost_captured_at: captured_at,
            pricing_tier: None,
        }
    }

    /// Set the pricing tier.
    #[must_use]
    pub fn with_pricing_tier(mut self, tier: Option<String>) -> Self {
        self.pricing_tier = tier;
        self
    }
}

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionMetadata {
    /// When the collector produced the event.
    pub collected_at: DateTime<Utc>,
    /// Version of the collector that produced it.
    pub collector_version: String,
    /// Correlation ID of the collection run.
    pub correlation_id: CorrelationId,
    /// Attempt number of the run minus one.
    pub retry_count: u32,
    /// Page the event was read from, when the vendor API is paginated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pagination: Option<SourcePagination>,
}

/// Pagination position of the page an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourcePagination {
    /// Zero-based page number within the run.
    pub page: u32,
    /// Cursor used to fetch the page (`None` for the first page).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::retell_event;
    use super::*;
    use std::str::FromStr;

    #[test]
    fn unit_cost_times_quantity() {
        let event = retell_event("call_123", "5.5", "0.05");
        assert_eq!(
            event.vendor_cost_data.total_cost,
            Decimal::from_str("0.275").unwrap()
        );
        assert_eq!(
            event.effective_unit_cost(),
            Some(Decimal::from_str("0.05").unwrap())
        );
    }

    #[test]
    fn zero_quantity_has_no_effective_unit_cost() {
        let event = retell_event("call_0", "0", "0.05");
        assert_eq!(event.effective_unit_cost(), None);
    }

    #[test]
    fn from_total_cost_derives_unit_cost() {
        let now = Utc::now();
        let cost = VendorCostData::from_total_cost(
            Decimal::from_str("0.03").unwrap(),
            Decimal::from(2),
            "USD",
            now,
        );
        assert_eq!(cost.unit_cost, Decimal::from_str("0.015").unwrap());

        let zero = VendorCostData::from_total_cost(Decimal::ONE, Decimal::ZERO, "USD", now);
        assert_eq!(zero.unit_cost, Decimal::ZERO);
        assert_eq!(zero.total_cost, Decimal::ONE);
    }

    #[test]
    fn wire_form_uses_camel_case() {
        let event = retell_event("call_123", "5.5", "0.05").with_tag("region", "eu");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("eventId").is_some());
        assert!(json.get("metricKey").is_some());
        assert!(json["vendorCostData"].get("totalCost").is_some());
        assert!(json["collectionMetadata"].get("correlationId").is_some());
        assert_eq!(json["tags"]["region"], "eu");
        assert!(json.get("agentId").is_none());
    }

    #[test]
    fn wire_form_rejects_unknown_fields() {
        let event = retell_event("call_123", "5.5", "0.05");
        let mut json = serde_json::to_value(&event).unwrap();
        json["surprise"] = serde_json::json!(true);
        assert!(serde_json::from_value::<UsageEvent>(json).is_err());
    }
}
