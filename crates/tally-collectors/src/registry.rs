//! Registry of available collectors.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tally_core::{MetricCatalog, ProviderId};

use crate::collector::Collector;
use crate::error::CollectorError;
use crate::throttle::ProviderThrottle;

/// Collectors by provider.
///
/// Registering a collector also sizes its provider's buckets from the declared rate
/// limits.
pub struct CollectorRegistry {
    collectors: BTreeMap<ProviderId, Arc<dyn Collector>>,
    throttle: Arc<ProviderThrottle>,
}

impl CollectorRegistry {
    /// Create an empty registry sharing `throttle` with the collectors' HTTP clients.
    #[must_use]
    pub fn new(throttle: Arc<ProviderThrottle>) -> Self {
        Self {
            collectors: BTreeMap::new(),
            throttle,
        }
    }

    /// Register a collector, replacing any previous one for the same provider.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        let provider = collector.provider_id().clone();
        self.throttle.configure(&provider, collector.rate_limits());
        tracing::info!(provider = %provider, "Registered collector");
        self.collectors.insert(provider, collector);
    }

    /// Resolve the collector of a provider.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::UnknownProvider` if none is registered.
    pub fn get(&self, provider: &ProviderId) -> Result<Arc<dyn Collector>, CollectorError> {
        self.collectors
            .get(provider)
            .cloned()
            .ok_or_else(|| CollectorError::UnknownProvider(provider.to_string()))
    }

    /// Registered providers, sorted.
    #[must_use]
    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.collectors.keys().cloned().collect()
    }

    /// Registered collectors, sorted by provider.
    pub fn collectors(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.values()
    }

    /// Probe every provider's credentials concurrently.
    ///
    /// A probe that errors reports `false` without affecting the others.
    pub async fn validate_all_credentials(&self) -> BTreeMap<ProviderId, bool> {
        let probes = self.collectors.iter().map(|(provider, collector)| async move {
            let valid = match collector.validate_credentials().await {
                Ok(valid) => valid,
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "Credential probe failed");
                    false
                }
            };
            (provider.clone(), valid)
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Catalog of every registered metric.
    #[must_use]
    pub fn metric_catalog(&self) -> MetricCatalog {
        let mut catalog = MetricCatalog::new();
        for (provider, collector) in &self.collectors {
            catalog.register(provider, collector.metric_definitions());
        }
        catalog
    }

    /// The shared provider throttle.
    #[must_use]
    pub fn throttle(&self) -> &Arc<ProviderThrottle> {
        &self.throttle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectParams, CollectResult, RateLimits};
    use async_trait::async_trait;
    use tally_core::{MetricDefinition, MetricKey, MetricUnit};

    struct Probe {
        provider: ProviderId,
        outcome: Result<bool, CollectorError>,
    }

    #[async_trait]
    impl Collector for Probe {
        fn provider_id(&self) -> &ProviderId {
            &self.provider
        }

        fn metric_definitions(&self) -> Vec<MetricDefinition> {
            vec![MetricDefinition::new(
                MetricKey::for_provider(&self.provider, "units").unwrap(),
                MetricUnit::Request,
                "Units",
            )]
        }

        fn rate_limits(&self) -> RateLimits {
            RateLimits {
                requests_per_minute: 10,
                requests_per_hour: None,
                burst_capacity: 1,
            }
        }

        async fn collect(&self, _params: &CollectParams) -> Result<CollectResult, CollectorError> {
            Err(CollectorError::Permanent("not used".into()))
        }

        async fn validate_credentials(&self) -> Result<bool, CollectorError> {
            self.outcome.clone()
        }
    }

    fn registry() -> CollectorRegistry {
        let mut registry = CollectorRegistry::new(Arc::new(ProviderThrottle::new()));
        for (name, outcome) in [
            ("retell", Ok(true)),
            ("twilio", Err(CollectorError::Transient("down".into()))),
            ("openrouter", Ok(false)),
        ] {
            registry.register(Arc::new(Probe {
                provider: ProviderId::new(name).unwrap(),
                outcome,
            }));
        }
        registry
    }

    #[test]
    fn unknown_provider_is_reported() {
        let registry = registry();
        assert!(registry.get(&ProviderId::new("retell").unwrap()).is_ok());
        assert_eq!(
            registry.get(&ProviderId::new("vapi").unwrap()).err(),
            Some(CollectorError::UnknownProvider("vapi".into()))
        );
        assert_eq!(registry.available_providers().len(), 3);
    }

    #[tokio::test]
    async fn credential_failures_are_isolated() {
        let health = registry().validate_all_credentials().await;
        assert!(health[&ProviderId::new("retell").unwrap()]);
        assert!(!health[&ProviderId::new("twilio").unwrap()]);
        assert!(!health[&ProviderId::new("openrouter").unwrap()]);
    }

    #[test]
    fn catalog_covers_registered_metrics() {
        let catalog = registry().metric_catalog();
        assert_eq!(catalog.len(), 3);
        let retell = ProviderId::new("retell").unwrap();
        assert!(catalog
            .get(&retell, &MetricKey::new("retell.units").unwrap())
            .is_some());
    }
}
