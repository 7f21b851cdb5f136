//! Retell AI voice agent collector.
//!
//! Calls are listed with `POST /v2/list-calls`, filtered by start time and, when the
//! client has mapped agents, by agent. Each ended call becomes one
//! `retell.call_minutes` event priced from the pricing snapshot.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{
    resolve_agent, MetricDefinition, MetricKey, MetricUnit, ProviderId, VendorCostData,
};

use super::{
    client_mappings, metric_key, owned_by_client, performance, probe_outcome, provider_id,
    CollectorDeps,
};
use crate::collector::{
    page_size, CollectParams, CollectResult, Collector, Measurement, PageContext, RateLimits,
};
use crate::credentials::{require_credential, CredentialVault};
use crate::cursor::PageCursor;
use crate::directory::AgentDirectory;
use crate::error::CollectorError;
use crate::http::VendorHttp;
use crate::pricing::PricingCache;

/// Provider identifier.
pub const PROVIDER: &str = "retell";

const COLLECTOR_VERSION: &str = concat!("retell/", env!("CARGO_PKG_VERSION"));
const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;
const MS_PER_MINUTE: i64 = 60_000;

#[derive(Serialize)]
struct ListCallsRequest {
    filter_criteria: FilterCriteria,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination_key: Option<String>,
}

#[derive(Serialize)]
struct FilterCriteria {
    start_timestamp: Threshold,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    agent_id: Vec<String>,
}

#[derive(Serialize)]
struct Threshold {
    lower_threshold: i64,
    upper_threshold: i64,
}

#[derive(Debug, Deserialize)]
struct RetellCall {
    call_id: String,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    start_timestamp: Option<i64>,
    #[serde(default)]
    duration_ms: Option<i64>,
}

/// Collector for Retell call minutes.
pub struct RetellCollector {
    provider: ProviderId,
    call_minutes: MetricKey,
    http: VendorHttp,
    vault: Arc<dyn CredentialVault>,
    directory: Arc<dyn AgentDirectory>,
    pricing: Arc<PricingCache>,
}

impl RetellCollector {
    /// Create a collector against a Retell API base URL.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        deps: &CollectorDeps,
        pricing: Arc<PricingCache>,
    ) -> Result<Self, CollectorError> {
        let provider = provider_id(PROVIDER)?;
        Ok(Self {
            call_minutes: metric_key(&provider, "call_minutes")?,
            http: deps.http(&provider, base_url)?,
            vault: Arc::clone(&deps.vault),
            directory: Arc::clone(&deps.directory),
            pricing,
            provider,
        })
    }
}

#[async_trait]
impl Collector for RetellCollector {
    fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    fn metric_definitions(&self) -> Vec<MetricDefinition> {
        vec![MetricDefinition::new(
            self.call_minutes.clone(),
            MetricUnit::Minute,
            "Voice call minutes",
        )]
    }

    fn rate_limits(&self) -> RateLimits {
        RateLimits {
            requests_per_minute: 60,
            requests_per_hour: None,
            burst_capacity: 10,
        }
    }

    async fn collect(&self, params: &CollectParams) -> Result<CollectResult, CollectorError> {
        let started = Instant::now();
        let cursor = PageCursor::decode_opt(params.cursor.as_deref())?;
        let page = cursor.as_ref().map_or(0, |c| c.page);

        let credential =
            require_credential(self.vault.as_ref(), Some(&params.tenant_id), &self.provider)
                .await?;
        let mappings = client_mappings(self.directory.as_ref(), params, &self.provider).await?;
        let pricing = self.pricing.snapshot().await;
        let price = pricing.get(self.call_minutes.as_str()).ok_or_else(|| {
            CollectorError::Configuration(format!("no price for {}", self.call_minutes))
        })?;

        let limit = page_size(params.page_size_hint, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        let request = ListCallsRequest {
            filter_criteria: FilterCriteria {
                start_timestamp: Threshold {
                    lower_threshold: params.window.start.timestamp_millis(),
                    upper_threshold: params.window.end.timestamp_millis() - 1,
                },
                agent_id: mappings.iter().map(|m| m.external_agent_id.clone()).collect(),
            },
            limit,
            pagination_key: cursor.map(|c| c.position),
        };

        let url = self.http.url("/v2/list-calls");
        let response = self
            .http
            .send_json::<Vec<RetellCall>, _>(|client| {
                client
                    .post(&url)
                    .bearer_auth(credential.secret.expose())
                    .json(&request)
            })
            .await?;
        let calls = response.body;

        let context = PageContext {
            params,
            provider: &self.provider,
            collector_version: COLLECTOR_VERSION,
            page,
            collected_at: Utc::now(),
        };

        let mut events = Vec::with_capacity(calls.len());
        for call in &calls {
            let (Some(start_ms), Some(duration_ms)) = (call.start_timestamp, call.duration_ms)
            else {
                tracing::debug!(
                    correlation_id = %params.correlation_id,
                    call_id = %call.call_id,
                    "Skipping call without duration"
                );
                continue;
            };
            let Some(timestamp) = Utc.timestamp_millis_opt(start_ms).single() else {
                continue;
            };
            if !params.window.contains(timestamp)
                || !owned_by_client(&mappings, call.agent_id.as_deref())
            {
                continue;
            }

            let minutes =
                (Decimal::from(duration_ms.max(0)) / Decimal::from(MS_PER_MINUTE)).normalize();
            let cost = VendorCostData::from_unit_cost(
                price.unit_cost,
                minutes,
                price.currency.clone(),
                context.collected_at,
            )
            .with_pricing_tier(price.pricing_tier.clone());
            let agent_id = call
                .agent_id
                .as_deref()
                .and_then(|id| resolve_agent(&mappings, &self.provider, id))
                .cloned();

            events.push(context.event(
                Measurement {
                    event_type: "phone_call".into(),
                    metric_key: self.call_minutes.clone(),
                    unit: MetricUnit::Minute,
                    quantity: minutes,
                    timestamp,
                    cost,
                    resource_id: call.call_id.clone(),
                },
                agent_id,
            ));
        }

        let has_more = u32::try_from(calls.len()).unwrap_or(u32::MAX) >= limit;
        let next_cursor = if has_more {
            calls
                .last()
                .map(|last| PageCursor::next(last.call_id.clone(), page).encode())
        } else {
            None
        };

        Ok(CollectResult {
            events,
            has_more: next_cursor.is_some(),
            next_cursor,
            performance: performance(started, response.api_calls, response.quota),
        })
    }

    async fn validate_credentials(&self) -> Result<bool, CollectorError> {
        let Some(credential) = self.vault.credential(None, &self.provider).await? else {
            return Ok(false);
        };
        let url = self.http.url("/list-agents");
        probe_outcome(
            self.http
                .send_json::<serde_json::Value, _>(|client| {
                    client.get(&url).bearer_auth(credential.secret.expose())
                })
                .await,
        )
    }
}
