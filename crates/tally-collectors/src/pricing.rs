//! Cached vendor pricing.
//!
//! Collectors attach cost from a snapshot that is refreshed in the background at a
//! bounded interval. Reading a snapshot never waits on a pricing call: a stale snapshot
//! is served while the refresh runs, and a failed refresh keeps the old one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::ProviderId;
use tokio::sync::RwLock;

use crate::error::CollectorError;

/// Price of one unit of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Cost per unit.
    pub unit_cost: Decimal,
    /// ISO 4217 currency.
    pub currency: String,
    /// Vendor pricing tier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_tier: Option<String>,
}

impl PriceQuote {
    /// A per-unit price in a currency.
    #[must_use]
    pub fn new(unit_cost: Decimal, currency: impl Into<String>) -> Self {
        Self {
            unit_cost,
            currency: currency.into(),
            pricing_tier: None,
        }
    }
}

/// Prices of one provider at a point in time, keyed by price key.
///
/// Price keys are collector-defined (a metric key, or `model:direction` for token
/// pricing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingSnapshot {
    /// Prices by key.
    pub prices: BTreeMap<String, PriceQuote>,
    /// When the prices were fetched.
    pub fetched_at: DateTime<Utc>,
}

impl PricingSnapshot {
    /// A snapshot fetched now.
    #[must_use]
    pub fn new(prices: BTreeMap<String, PriceQuote>) -> Self {
        Self {
            prices,
            fetched_at: Utc::now(),
        }
    }

    /// A snapshot that is stale from the start, used as the initial fallback.
    #[must_use]
    pub fn fallback(prices: BTreeMap<String, PriceQuote>) -> Self {
        Self {
            prices,
            fetched_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Look up a price.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PriceQuote> {
        self.prices.get(key)
    }
}

/// Where current prices come from.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Fetch the current prices of a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the prices cannot be fetched.
    async fn fetch(&self, provider: &ProviderId) -> Result<PricingSnapshot, CollectorError>;
}

/// Prices from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    prices: BTreeMap<ProviderId, BTreeMap<String, PriceQuote>>,
}

impl StaticPricing {
    /// Create a static source.
    #[must_use]
    pub fn new(prices: BTreeMap<ProviderId, BTreeMap<String, PriceQuote>>) -> Self {
        Self { prices }
    }

    /// Configured prices of a provider.
    #[must_use]
    pub fn prices_for(&self, provider: &ProviderId) -> BTreeMap<String, PriceQuote> {
        self.prices.get(provider).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PricingSource for StaticPricing {
    async fn fetch(&self, provider: &ProviderId) -> Result<PricingSnapshot, CollectorError> {
        Ok(PricingSnapshot::new(self.prices_for(provider)))
    }
}

/// A provider's pricing snapshot with background refresh.
pub struct PricingCache {
    provider: ProviderId,
    source: Arc<dyn PricingSource>,
    current: RwLock<Arc<PricingSnapshot>>,
    refresh_interval: Duration,
    refreshing: AtomicBool,
}

impl PricingCache {
    /// Create a cache serving `initial` until the first refresh lands.
    #[must_use]
    pub fn new(
        provider: ProviderId,
        source: Arc<dyn PricingSource>,
        initial: PricingSnapshot,
        refresh_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            source,
            current: RwLock::new(Arc::new(initial)),
            refresh_interval,
            refreshing: AtomicBool::new(false),
        })
    }

    /// The current snapshot. Schedules a background refresh when it is stale.
    pub async fn snapshot(self: &Arc<Self>) -> Arc<PricingSnapshot> {
        let snapshot = Arc::clone(&*self.current.read().await);

        let age = Utc::now()
            .signed_duration_since(snapshot.fetched_at)
            .to_std()
            .unwrap_or_default();
        if age >= self.refresh_interval && !self.refreshing.swap(true, Ordering::AcqRel) {
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                // Failures are logged; the stale snapshot stays in place.
                let _ = cache.refresh().await;
                cache.refreshing.store(false, Ordering::Release);
            });
        }

        snapshot
    }

    /// Fetch prices now and replace the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<(), CollectorError> {
        match self.source.fetch(&self.provider).await {
            Ok(snapshot) => {
                tracing::debug!(
                    provider = %self.provider,
                    prices = snapshot.prices.len(),
                    "Pricing snapshot refreshed"
                );
                *self.current.write().await = Arc::new(snapshot);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider,
                    error = %e,
                    "Pricing refresh failed, keeping previous snapshot"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::AtomicU32;

    struct CountingSource {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl PricingSource for CountingSource {
        async fn fetch(&self, _provider: &ProviderId) -> Result<PricingSnapshot, CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollectorError::Transient("pricing down".into()));
            }
            Ok(PricingSnapshot::new(BTreeMap::from([(
                "retell.call_minutes".to_string(),
                PriceQuote::new(Decimal::from_str("0.07").unwrap(), "USD"),
            )])))
        }
    }

    fn fallback() -> PricingSnapshot {
        PricingSnapshot::fallback(BTreeMap::from([(
            "retell.call_minutes".to_string(),
            PriceQuote::new(Decimal::from_str("0.05").unwrap(), "USD"),
        )]))
    }

    async fn settle(cache: &PricingCache) {
        for _ in 0..100 {
            if !cache.refreshing.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn stale_snapshot_is_served_while_refreshing() {
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let cache = PricingCache::new(
            ProviderId::new("retell").unwrap(),
            source.clone(),
            fallback(),
            Duration::from_secs(3600),
        );

        let first = cache.snapshot().await;
        assert_eq!(
            first.get("retell.call_minutes").unwrap().unit_cost,
            Decimal::from_str("0.05").unwrap()
        );

        settle(&cache).await;
        let second = cache.snapshot().await;
        assert_eq!(
            second.get("retell.call_minutes").unwrap().unit_cost,
            Decimal::from_str("0.07").unwrap()
        );

        // Fresh now: no further fetches.
        let _ = cache.snapshot().await;
        settle(&cache).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let cache = PricingCache::new(
            ProviderId::new("retell").unwrap(),
            Arc::new(CountingSource {
                calls: AtomicU32::new(0),
                fail: true,
            }),
            fallback(),
            Duration::from_secs(3600),
        );

        assert!(cache.refresh().await.is_err());
        let snapshot = cache.snapshot().await;
        assert_eq!(
            snapshot.get("retell.call_minutes").unwrap().unit_cost,
            Decimal::from_str("0.05").unwrap()
        );
    }
}
