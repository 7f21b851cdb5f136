//! OpenRouter LLM routing collector.
//!
//! The activity endpoint reports one record per `(date, model, endpoint)` with the
//! request's prompt/completion tokens and total spend. Each record becomes an input
//! token event and an output token event. The spend is split between them in
//! proportion to the model's prompt/completion prices (token counts when the model is
//! not priced), and the output side takes the remainder so the two slices always sum
//! to the record's total.
//!
//! One page is one UTC day; only days that have fully elapsed are collected.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tally_core::{MetricDefinition, MetricKey, MetricUnit, ProviderId, VendorCostData};

use super::{metric_key, performance, probe_outcome, provider_id, CollectorDeps};
use crate::collector::{
    CollectParams, CollectResult, Collector, Measurement, PageContext, RateLimits,
};
use crate::credentials::{require_credential, CredentialVault};
use crate::cursor::PageCursor;
use crate::error::CollectorError;
use crate::http::{QuotaStatus, VendorHttp};
use crate::pricing::{PriceQuote, PricingCache, PricingSnapshot, PricingSource};

/// Provider identifier.
pub const PROVIDER: &str = "openrouter";

const COLLECTOR_VERSION: &str = concat!("openrouter/", env!("CARGO_PKG_VERSION"));
const CURRENCY: &str = "USD";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize)]
struct ActivityPage {
    data: Vec<ActivityRecord>,
}

#[derive(Debug, Deserialize)]
struct ActivityRecord {
    date: String,
    model: String,
    #[serde(default)]
    endpoint_id: Option<String>,
    #[serde(default)]
    usage: Option<serde_json::Number>,
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl ActivityRecord {
    fn total_cost(&self) -> Result<Decimal, CollectorError> {
        self.usage.as_ref().map_or(Ok(Decimal::ZERO), |n| {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .map_err(|e| CollectorError::Permanent(format!("unreadable usage {raw}: {e}")))
        })
    }

    fn resource_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.date,
            self.model,
            self.endpoint_id.as_deref().unwrap_or("default")
        )
    }
}

/// Cost of a record split into its input and output slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CostSplit {
    input: Decimal,
    output: Decimal,
}

/// Split `total` in proportion to `input_weight : output_weight`.
///
/// When both weights are zero the input side carries the whole cost. The input slice
/// is truncated so neither slice can go negative.
fn split_cost(total: Decimal, input_weight: Decimal, output_weight: Decimal) -> CostSplit {
    let weight = input_weight + output_weight;
    let input = if weight.is_zero() {
        total
    } else {
        (total * input_weight)
            .checked_div(weight)
            .unwrap_or(total)
            .round_dp_with_strategy(12, RoundingStrategy::ToZero)
            .min(total)
    };
    CostSplit {
        input,
        output: total - input,
    }
}

/// Collector for OpenRouter token usage.
pub struct OpenRouterCollector {
    provider: ProviderId,
    input_tokens: MetricKey,
    output_tokens: MetricKey,
    http: VendorHttp,
    vault: Arc<dyn CredentialVault>,
    pricing: Arc<PricingCache>,
}

impl OpenRouterCollector {
    /// Create a collector against an OpenRouter API base URL.
    ///
    /// OpenRouter keys are account-wide, so records are attributed to the collected
    /// client without agent mapping.
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
            input_tokens: metric_key(&provider, "input_tokens")?,
            output_tokens: metric_key(&provider, "output_tokens")?,
            http: deps.http(&provider, base_url)?,
            vault: Arc::clone(&deps.vault),
            pricing,
            provider,
        })
    }

    /// First day to collect, honoring the cursor.
    fn first_day(
        params: &CollectParams,
        cursor: Option<&PageCursor>,
    ) -> Result<NaiveDate, CollectorError> {
        match cursor {
            Some(cursor) => NaiveDate::parse_from_str(&cursor.position, DATE_FORMAT)
                .map_err(|_| CollectorError::Permanent("malformed cursor date".into())),
            None => Ok(params.window.start.date_naive()),
        }
    }

    /// Last day worth collecting: inside the window and already over.
    fn last_day(params: &CollectParams, now: DateTime<Utc>) -> Option<NaiveDate> {
        let window_last = (params.window.end - chrono::Duration::nanoseconds(1)).date_naive();
        let last_complete = now.date_naive().pred_opt()?;
        Some(window_last.min(last_complete))
    }

    fn measurements(
        &self,
        record: &ActivityRecord,
        timestamp: DateTime<Utc>,
        pricing: &PricingSnapshot,
        collected_at: DateTime<Utc>,
    ) -> Result<[Measurement; 2], CollectorError> {
        let total = record.total_cost()?;
        let prompt = Decimal::from(record.prompt_tokens);
        let completion = Decimal::from(record.completion_tokens);

        let prompt_price = pricing.get(&format!("{}:prompt", record.model));
        let completion_price = pricing.get(&format!("{}:completion", record.model));
        let split = match (prompt_price, completion_price) {
            (Some(p), Some(c)) => split_cost(total, p.unit_cost * prompt, c.unit_cost * completion),
            _ => split_cost(total, prompt, completion),
        };

        let resource_id = record.resource_id();
        let side = |metric_key: &MetricKey, quantity: Decimal, cost: Decimal| Measurement {
            event_type: "generation".into(),
            metric_key: metric_key.clone(),
            unit: MetricUnit::Token,
            quantity,
            timestamp,
            cost: VendorCostData::from_total_cost(cost, quantity, CURRENCY, collected_at),
            resource_id: resource_id.clone(),
        };

        Ok([
            side(&self.input_tokens, prompt, split.input),
            side(&self.output_tokens, completion, split.output),
        ])
    }
}

#[async_trait]
impl Collector for OpenRouterCollector {
    fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    fn metric_definitions(&self) -> Vec<MetricDefinition> {
        vec![
            MetricDefinition::new(self.input_tokens.clone(), MetricUnit::Token, "Input tokens"),
            MetricDefinition::new(self.output_tokens.clone(), MetricUnit::Token, "Output tokens"),
        ]
    }

    fn rate_limits(&self) -> RateLimits {
        RateLimits {
            requests_per_minute: 60,
            requests_per_hour: None,
            burst_capacity: 5,
        }
    }

    async fn collect(&self, params: &CollectParams) -> Result<CollectResult, CollectorError> {
        let started = Instant::now();
        let cursor = PageCursor::decode_opt(params.cursor.as_deref())?;
        let page = cursor.as_ref().map_or(0, |c| c.page);
        let collected_at = Utc::now();

        let day = Self::first_day(params, cursor.as_ref())?;
        let Some(last_day) = Self::last_day(params, collected_at).filter(|last| day <= *last)
        else {
            return Ok(CollectResult {
                events: Vec::new(),
                next_cursor: None,
                has_more: false,
                performance: performance(started, 0, QuotaStatus::default()),
            });
        };

        let credential =
            require_credential(self.vault.as_ref(), Some(&params.tenant_id), &self.provider)
                .await?;
        let pricing = self.pricing.snapshot().await;

        let date = day.format(DATE_FORMAT).to_string();
        let url = self.http.url(&format!("/api/v1/activity?date={date}"));
        let response = self
            .http
            .send_json::<ActivityPage, _>(|client| {
                client.get(&url).bearer_auth(credential.secret.expose())
            })
            .await?;

        let context = PageContext {
            params,
            provider: &self.provider,
            collector_version: COLLECTOR_VERSION,
            page,
            collected_at,
        };

        // Activity is daily; a window starting mid-day stamps that day at its start.
        let midnight = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let timestamp = midnight.max(params.window.start);

        let mut events = Vec::with_capacity(response.body.data.len() * 2);
        for record in &response.body.data {
            if record.date != date {
                continue;
            }
            for measurement in self.measurements(record, timestamp, &pricing, collected_at)? {
                events.push(context.event(measurement, None));
            }
        }

        let next_cursor = day
            .checked_add_days(Days::new(1))
            .filter(|next| *next <= last_day)
            .map(|next| PageCursor::next(next.format(DATE_FORMAT).to_string(), page).encode());

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
        let url = self.http.url("/api/v1/key");
        probe_outcome(
            self.http
                .send_json::<serde_json::Value, _>(|client| {
                    client.get(&url).bearer_auth(credential.secret.expose())
                })
                .await,
        )
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    pricing: Option<ModelPricing>,
}

#[derive(Debug, Deserialize)]
struct ModelPricing {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

/// Live per-token prices from the public model list.
pub struct OpenRouterPricing {
    http: VendorHttp,
}

impl OpenRouterPricing {
    /// Create a pricing source against an OpenRouter API base URL.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: &str, deps: &CollectorDeps) -> Result<Self, CollectorError> {
        let provider = provider_id(PROVIDER)?;
        Ok(Self {
            http: deps.http(&provider, base_url)?,
        })
    }
}

#[async_trait]
impl PricingSource for OpenRouterPricing {
    async fn fetch(&self, _provider: &ProviderId) -> Result<PricingSnapshot, CollectorError> {
        let url = self.http.url("/api/v1/models");
        let response = self
            .http
            .send_json::<ModelList, _>(|client| client.get(&url))
            .await?;

        let mut prices = BTreeMap::new();
        for model in response.body.data {
            let Some(pricing) = model.pricing else {
                continue;
            };
            for (direction, price) in [("prompt", pricing.prompt), ("completion", pricing.completion)] {
                if let Some(unit_cost) = price.and_then(|p| Decimal::from_str(&p).ok()) {
                    prices.insert(
                        format!("{}:{direction}", model.id),
                        PriceQuote::new(unit_cost, CURRENCY),
                    );
                }
            }
        }
        Ok(PricingSnapshot::new(prices))
    }
}
