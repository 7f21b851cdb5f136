//! Quarantined events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AgentId, ClientId, CorrelationId, GroupKey, MetricKey, ProviderId, QuarantineId, TenantId,
    UsageEvent, ValidationError,
};

/// An event rejected by validation, kept with its error for inspection and replay.
///
/// Attribution fields are best-effort: a payload that failed schema parsing may not
/// carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedEvent {
    /// Quarantine record ID.
    pub quarantine_id: QuarantineId,
    /// Run or ingest batch the event arrived with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Tenant, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Client, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Agent, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Provider, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    /// Metric, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_key: Option<MetricKey>,
    /// Vendor timestamp, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<DateTime<Utc>>,
    /// Validation error.
    pub reason: String,
    /// The rejected payload.
    pub payload: serde_json::Value,
    /// When the event was quarantined.
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedEvent {
    /// Quarantine a parsed event that failed validation.
    #[must_use]
    pub fn from_event(event: &UsageEvent, error: &ValidationError) -> Self {
        Self {
            quarantine_id: QuarantineId::generate(),
            correlation_id: Some(event.collection_metadata.correlation_id.clone()),
            tenant_id: Some(event.tenant_id.clone()),
            client_id: Some(event.client_id.clone()),
            agent_id: event.agent_id.clone(),
            provider: Some(event.provider.clone()),
            metric_key: Some(event.metric_key.clone()),
            event_timestamp: Some(event.event_timestamp),
            reason: error.to_string(),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            quarantined_at: Utc::now(),
        }
    }

    /// Quarantine a raw payload that could not be parsed.
    ///
    /// Attribution is recovered from the payload's fields where they are well-formed.
    #[must_use]
    pub fn from_payload(
        payload: serde_json::Value,
        correlation_id: Option<CorrelationId>,
        error: &ValidationError,
    ) -> Self {
        let field = |name: &str| payload.get(name).and_then(serde_json::Value::as_str);
        Self {
            quarantine_id: QuarantineId::generate(),
            correlation_id,
            tenant_id: field("tenantId").and_then(|v| TenantId::new(v).ok()),
            client_id: field("clientId").and_then(|v| ClientId::new(v).ok()),
            agent_id: field("agentId").and_then(|v| AgentId::new(v).ok()),
            provider: field("provider").and_then(|v| ProviderId::new(v).ok()),
            metric_key: field("metricKey").and_then(|v| MetricKey::new(v).ok()),
            event_timestamp: field("eventTimestamp")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc)),
            reason: error.to_string(),
            payload,
            quarantined_at: Utc::now(),
        }
    }

    /// The aggregate group this event would have landed in, when fully attributed.
    #[must_use]
    pub fn group_key(&self) -> Option<GroupKey> {
        Some(GroupKey {
            tenant_id: self.tenant_id.clone()?,
            client_id: self.client_id.clone()?,
            agent_id: self.agent_id.clone(),
            provider: self.provider.clone()?,
            metric_key: self.metric_key.clone()?,
        })
    }
}
