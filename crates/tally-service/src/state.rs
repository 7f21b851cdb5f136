//! Application state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tally_collectors::{
    CollectorDeps, CollectorError, CollectorRegistry, OpenRouterCollector, OpenRouterPricing,
    PriceQuote, PricingCache, PricingSnapshot, PricingSource, ProviderThrottle, RetellCollector,
    StaticDirectory, StaticPricing, TwilioCollector,
};
use tally_core::ProviderId;
use tally_store::Store;

use crate::config::ServiceConfig;
use crate::engine::{
    AggregationEngine, AuditSink, CollectionEngine, EventWriter, IdempotencyManager, TracingAudit,
};

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Registered collectors.
    pub registry: Arc<CollectorRegistry>,

    /// Seen-set of recently written events.
    pub idempotency: Arc<IdempotencyManager>,

    /// Event writer shared by collection runs and direct ingestion.
    pub writer: Arc<EventWriter>,

    /// Collection orchestrator.
    pub collections: Arc<CollectionEngine>,

    /// Cycle aggregation engine.
    pub aggregations: Arc<AggregationEngine>,
}

impl AppState {
    /// Build the state with the built-in collectors.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Configuration` if a collector's HTTP client cannot be
    /// built.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, CollectorError> {
        let registry = build_registry(&config)?;
        Ok(Self::with_registry(store, config, registry, Arc::new(TracingAudit)))
    }

    /// Build the state around an existing registry and audit sink.
    #[must_use]
    pub fn with_registry(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        registry: CollectorRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let registry = Arc::new(registry);
        let idempotency = Arc::new(IdempotencyManager::new(Duration::from_secs(
            config.engine.dedup_window_hours * 3600,
        )));
        let writer = Arc::new(EventWriter::new(
            Arc::clone(&store),
            Arc::clone(&idempotency),
            registry.metric_catalog(),
        ));
        let collections = Arc::new(CollectionEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&writer),
            Arc::clone(&audit),
            config.engine.clone(),
        ));
        let aggregations = Arc::new(AggregationEngine::new(
            Arc::clone(&store),
            config.quality.clone(),
            audit,
        ));

        Self {
            store,
            config,
            registry,
            idempotency,
            writer,
            collections,
            aggregations,
        }
    }
}

fn build_registry(config: &ServiceConfig) -> Result<CollectorRegistry, CollectorError> {
    let throttle = Arc::new(ProviderThrottle::new());
    let deps = CollectorDeps {
        vault: Arc::new(config.credentials.vault()),
        directory: Arc::new(StaticDirectory::new(config.mappings.clone())),
        throttle: Arc::clone(&throttle),
        request_timeout: config.engine.call_timeout,
    };
    let static_prices: Arc<dyn PricingSource> = Arc::new(StaticPricing::new(config.pricing.clone()));
    let refresh = config.engine.pricing_refresh;
    let endpoints = &config.providers;

    let retell = pricing_cache(config, "retell", Arc::clone(&static_prices), refresh)?;
    let openrouter_prices: Arc<dyn PricingSource> =
        Arc::new(OpenRouterPricing::new(&endpoints.openrouter_base_url, &deps)?);
    let openrouter = pricing_cache(config, "openrouter", openrouter_prices, refresh)?;

    let mut registry = CollectorRegistry::new(throttle);
    registry.register(Arc::new(RetellCollector::new(
        &endpoints.retell_base_url,
        &deps,
        retell,
    )?));
    registry.register(Arc::new(TwilioCollector::new(
        &endpoints.twilio_base_url,
        &deps,
    )?));
    registry.register(Arc::new(OpenRouterCollector::new(
        &endpoints.openrouter_base_url,
        &deps,
        openrouter,
    )?));

    for provider in ["retell", "twilio", "openrouter"] {
        if !config.credentials.has_provider(provider) {
            tracing::warn!(provider, "No provider-wide credential configured");
        }
    }
    Ok(registry)
}

/// A pricing cache seeded with the configured prices of `provider`.
fn pricing_cache(
    config: &ServiceConfig,
    provider: &str,
    source: Arc<dyn PricingSource>,
    refresh: Duration,
) -> Result<Arc<PricingCache>, CollectorError> {
    let provider =
        ProviderId::new(provider).map_err(|e| CollectorError::Configuration(e.to_string()))?;
    let configured: BTreeMap<String, PriceQuote> =
        config.pricing.get(&provider).cloned().unwrap_or_default();
    Ok(PricingCache::new(
        provider,
        source,
        PricingSnapshot::fallback(configured),
        refresh,
    ))
}
