//! Event validation against the canonical model invariants.

use rust_decimal::Decimal;

use crate::{MetricCatalog, MetricKey, ProviderId, UsageEvent};

/// Largest accepted gap between `unitCost × quantity` and `totalCost`.
const COST_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Clock skew accepted between a vendor timestamp and the collection time.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Reasons an event is rejected (and quarantined) by the writer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The payload does not match the canonical wire schema.
    #[error("schema violation: {0}")]
    Schema(String),

    /// Quantity is negative.
    #[error("quantity must not be negative: {quantity}")]
    NegativeQuantity {
        /// The offending quantity.
        quantity: Decimal,
    },

    /// The metric key does not belong to the event's provider.
    #[error("metric {metric_key} is not emitted by provider {provider}")]
    ProviderMismatch {
        /// Event provider.
        provider: ProviderId,
        /// Event metric key.
        metric_key: MetricKey,
    },

    /// The provider/metric pair is not in the catalog.
    #[error("unknown metric {metric_key} for provider {provider}")]
    UnknownMetric {
        /// Event provider.
        provider: ProviderId,
        /// Event metric key.
        metric_key: MetricKey,
    },

    /// The unit does not match the metric definition.
    #[error("unit {actual} does not match metric unit {expected}")]
    UnitMismatch {
        /// Unit declared by the metric definition.
        expected: &'static str,
        /// Unit carried by the event.
        actual: &'static str,
    },

    /// Currency is not a three-letter ISO 4217 code.
    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Unit or total cost is negative.
    #[error("cost must not be negative")]
    NegativeCost,

    /// `unitCost × quantity` disagrees with `totalCost`.
    #[error("inconsistent cost: unit {unit_cost} x quantity {quantity} != total {total_cost}")]
    InconsistentCost {
        /// Declared unit cost.
        unit_cost: Decimal,
        /// Event quantity.
        quantity: Decimal,
        /// Declared total cost.
        total_cost: Decimal,
    },

    /// A required string field is empty.
    #[error("field {0} must not be empty")]
    EmptyField(&'static str),

    /// The event claims to have happened after it was collected.
    #[error("event timestamp is after its collection time")]
    TimestampAfterCollection,
}

/// Parse a canonical wire-format event, rejecting unknown fields.
///
/// # Errors
///
/// Returns `ValidationError::Schema` if the payload does not deserialize.
pub fn parse_wire_event(payload: serde_json::Value) -> Result<UsageEvent, ValidationError> {
    serde_json::from_value(payload).map_err(|e| ValidationError::Schema(e.to_string()))
}

/// Validate an event against the canonical model invariants.
///
/// # Errors
///
/// Returns the first invariant the event violates.
pub fn validate_event(event: &UsageEvent, catalog: &MetricCatalog) -> Result<(), ValidationError> {
    if event.quantity.is_sign_negative() && !event.quantity.is_zero() {
        return Err(ValidationError::NegativeQuantity {
            quantity: event.quantity,
        });
    }

    if event.event_type.trim().is_empty() {
        return Err(ValidationError::EmptyField("eventType"));
    }
    if event.resource_id.as_deref().is_some_and(str::is_empty) {
        return Err(ValidationError::EmptyField("resourceId"));
    }

    if event.metric_key.provider_prefix() != event.provider.as_str() {
        return Err(ValidationError::ProviderMismatch {
            provider: event.provider.clone(),
            metric_key: event.metric_key.clone(),
        });
    }

    let definition = catalog
        .get(&event.provider, &event.metric_key)
        .ok_or_else(|| ValidationError::UnknownMetric {
            provider: event.provider.clone(),
            metric_key: event.metric_key.clone(),
        })?;
    if definition.unit != event.unit {
        return Err(ValidationError::UnitMismatch {
            expected: definition.unit.as_str(),
            actual: event.unit.as_str(),
        });
    }

    validate_cost(event)?;

    let skew = chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS);
    if event.event_timestamp > event.collection_metadata.collected_at + skew {
        return Err(ValidationError::TimestampAfterCollection);
    }

    Ok(())
}

fn validate_cost(event: &UsageEvent) -> Result<(), ValidationError> {
    let cost = &event.vendor_cost_data;

    if !is_currency_code(&cost.currency) {
        return Err(ValidationError::InvalidCurrency(cost.currency.clone()));
    }
    if (cost.unit_cost.is_sign_negative() && !cost.unit_cost.is_zero())
        || (cost.total_cost.is_sign_negative() && !cost.total_cost.is_zero())
    {
        return Err(ValidationError::NegativeCost);
    }

    // Zero-quantity records may still carry a flat cost.
    if !event.quantity.is_zero() {
        let expected = cost.unit_cost.checked_mul(event.quantity);
        let consistent = expected.is_some_and(|e| (e - cost.total_cost).abs() <= COST_TOLERANCE);
        if !consistent {
            return Err(ValidationError::InconsistentCost {
                unit_cost: cost.unit_cost,
                quantity: event.quantity,
                total_cost: cost.total_cost,
            });
        }
    }

    Ok(())
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}
