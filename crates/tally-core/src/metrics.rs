//! Metric definitions and the catalog of known `(provider, metricKey)` pairs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{MetricKey, MetricUnit, ProviderId};

/// Static description of a metric a provider emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    /// Canonical metric key.
    pub metric_key: MetricKey,
    /// Unit of the metric's quantities.
    pub unit: MetricUnit,
    /// Human-readable name.
    pub display_name: String,
}

impl MetricDefinition {
    /// Create a metric definition.
    #[must_use]
    pub fn new(metric_key: MetricKey, unit: MetricUnit, display_name: impl Into<String>) -> Self {
        Self {
            metric_key,
            unit,
            display_name: display_name.into(),
        }
    }
}

/// The set of metrics every registered provider declares.
///
/// Used by the event writer to reject events for unknown provider/metric pairs.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    definitions: BTreeMap<MetricKey, (ProviderId, MetricDefinition)>,
}

impl MetricCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's metric definitions.
    pub fn register(&mut self, provider: &ProviderId, definitions: Vec<MetricDefinition>) {
        for definition in definitions {
            self.definitions.insert(
                definition.metric_key.clone(),
                (provider.clone(), definition),
            );
        }
    }

    /// Look up the definition for a provider/metric pair.
    ///
    /// Returns `None` if the metric is unknown or belongs to another provider.
    #[must_use]
    pub fn get(&self, provider: &ProviderId, metric_key: &MetricKey) -> Option<&MetricDefinition> {
        self.definitions
            .get(metric_key)
            .filter(|(owner, _)| owner == provider)
            .map(|(_, definition)| definition)
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
