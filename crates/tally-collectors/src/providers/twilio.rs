//! Twilio voice collector.
//!
//! Calls are listed from the account's `Calls.json`, following `next_page_uri`.
//! Twilio reports the charged price per call, so cost is taken from the record and
//! quantity is the billed minutes (duration rounded up to the minute).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
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
use crate::credentials::{require_credential, Credential, CredentialVault};
use crate::cursor::PageCursor;
use crate::directory::AgentDirectory;
use crate::error::CollectorError;
use crate::http::VendorHttp;

/// Provider identifier.
pub const PROVIDER: &str = "twilio";

const COLLECTOR_VERSION: &str = concat!("twilio/", env!("CARGO_PKG_VERSION"));
const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct CallsPage {
    calls: Vec<TwilioCall>,
    #[serde(default)]
    next_page_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioCall {
    sid: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    price_unit: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    from: Option<String>,
}

impl TwilioCall {
    /// Our side of the call: the dialed number for inbound calls, the caller otherwise.
    fn own_number(&self) -> Option<&str> {
        if self.direction.as_deref() == Some("inbound") {
            self.to.as_deref()
        } else {
            self.from.as_deref()
        }
    }
}

/// Billed minutes of a call duration in seconds.
fn billed_minutes(seconds: u64) -> Decimal {
    Decimal::from(seconds.div_ceil(60))
}

/// Collector for Twilio call minutes.
pub struct TwilioCollector {
    provider: ProviderId,
    call_minutes: MetricKey,
    http: VendorHttp,
    vault: Arc<dyn CredentialVault>,
    directory: Arc<dyn AgentDirectory>,
}

impl TwilioCollector {
    /// Create a collector against a Twilio API base URL.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: &str, deps: &CollectorDeps) -> Result<Self, CollectorError> {
        let provider = provider_id(PROVIDER)?;
        Ok(Self {
            call_minutes: metric_key(&provider, "call_minutes")?,
            http: deps.http(&provider, base_url)?,
            vault: Arc::clone(&deps.vault),
            directory: Arc::clone(&deps.directory),
            provider,
        })
    }

    fn account_sid(credential: &Credential) -> Result<&str, CollectorError> {
        credential.account_id.as_deref().ok_or_else(|| {
            CollectorError::Configuration("twilio credential lacks an account SID".into())
        })
    }

    fn first_page_url(&self, sid: &str, params: &CollectParams) -> String {
        // Twilio filters by date; the exact window is applied per record.
        let from: NaiveDate = params.window.start.date_naive();
        let last_instant = params.window.end - chrono::Duration::nanoseconds(1);
        let until = last_instant
            .date_naive()
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX);
        let size = page_size(params.page_size_hint, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        self.http.url(&format!(
            "/2010-04-01/Accounts/{sid}/Calls.json?StartTime%3E={from}&StartTime%3C={until}&PageSize={size}"
        ))
    }

    fn measure(&self, call: &TwilioCall, collected_at: DateTime<Utc>) -> Option<Measurement> {
        let timestamp = DateTime::parse_from_rfc2822(call.start_time.as_deref()?)
            .ok()?
            .with_timezone(&Utc);
        let seconds: u64 = call.duration.as_deref()?.parse().ok()?;
        // Twilio reports charges as negative amounts.
        let price = Decimal::from_str(call.price.as_deref()?).ok()?.abs();
        let currency = call.price_unit.as_deref().unwrap_or("USD").to_ascii_uppercase();
        let minutes = billed_minutes(seconds);

        Some(Measurement {
            event_type: "call".into(),
            metric_key: self.call_minutes.clone(),
            unit: MetricUnit::Minute,
            quantity: minutes,
            timestamp,
            cost: VendorCostData::from_total_cost(price, minutes, currency, collected_at),
            resource_id: call.sid.clone(),
        })
    }
}

#[async_trait]
impl Collector for TwilioCollector {
    fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    fn metric_definitions(&self) -> Vec<MetricDefinition> {
        vec![MetricDefinition::new(
            self.call_minutes.clone(),
            MetricUnit::Minute,
            "Billed call minutes",
        )]
    }

    fn rate_limits(&self) -> RateLimits {
        RateLimits {
            requests_per_minute: 600,
            requests_per_hour: None,
            burst_capacity: 20,
        }
    }

    async fn collect(&self, params: &CollectParams) -> Result<CollectResult, CollectorError> {
        let started = Instant::now();
        let cursor = PageCursor::decode_opt(params.cursor.as_deref())?;
        let page = cursor.as_ref().map_or(0, |c| c.page);

        let credential =
            require_credential(self.vault.as_ref(), Some(&params.tenant_id), &self.provider)
                .await?;
        let sid = Self::account_sid(&credential)?;
        let mappings = client_mappings(self.directory.as_ref(), params, &self.provider).await?;

        let url = match &cursor {
            Some(cursor) => self.http.url(&cursor.position),
            None => self.first_page_url(sid, params),
        };
        let response = self
            .http
            .send_json::<CallsPage, _>(|client| {
                client
                    .get(&url)
                    .basic_auth(sid, Some(credential.secret.expose()))
            })
            .await?;
        let body = response.body;

        let context = PageContext {
            params,
            provider: &self.provider,
            collector_version: COLLECTOR_VERSION,
            page,
            collected_at: Utc::now(),
        };

        let mut events = Vec::with_capacity(body.calls.len());
        for call in &body.calls {
            let Some(measurement) = self.measure(call, context.collected_at) else {
                tracing::debug!(
                    correlation_id = %params.correlation_id,
                    call_sid = %call.sid,
                    "Skipping unpriced or incomplete call"
                );
                continue;
            };
            if !params.window.contains(measurement.timestamp)
                || !owned_by_client(&mappings, call.own_number())
            {
                continue;
            }
            let agent_id = call
                .own_number()
                .and_then(|number| resolve_agent(&mappings, &self.provider, number))
                .cloned();
            events.push(context.event(measurement, agent_id));
        }

        let next_cursor = body
            .next_page_uri
            .filter(|uri| !uri.is_empty())
            .map(|uri| PageCursor::next(uri, page).encode());

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
        let sid = Self::account_sid(&credential)?;
        let url = self.http.url(&format!("/2010-04-01/Accounts/{sid}.json"));
        probe_outcome(
            self.http
                .send_json::<serde_json::Value, _>(|client| {
                    client
                        .get(&url)
                        .basic_auth(sid, Some(credential.secret.expose()))
                })
                .await,
        )
    }
}
