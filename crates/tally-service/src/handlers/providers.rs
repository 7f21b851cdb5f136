//! Provider discovery and credential health.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tally_collectors::RateLimits;
use tally_core::{MetricDefinition, ProviderId};

use crate::auth::ServiceAuth;
use crate::state::AppState;

/// A registered provider.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Provider ID.
    pub provider: ProviderId,
    /// Metrics the provider's collector emits.
    pub metrics: Vec<MetricDefinition>,
    /// Declared vendor rate limits.
    pub rate_limits: RateLimits,
}

/// Credential health of every provider.
#[derive(Debug, Serialize)]
pub struct ProviderHealthResponse {
    /// Whether each provider accepted its credential.
    pub providers: BTreeMap<ProviderId, bool>,
}

/// List registered providers.
pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Json<Vec<ProviderInfo>> {
    Json(
        state
            .registry
            .collectors()
            .map(|c| ProviderInfo {
                provider: c.provider_id().clone(),
                metrics: c.metric_definitions(),
                rate_limits: c.rate_limits(),
            })
            .collect(),
    )
}

/// Probe every provider's credential.
pub async fn provider_health(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
) -> Json<ProviderHealthResponse> {
    tracing::debug!(service = %auth.service_name, "Validating provider credentials");
    Json(ProviderHealthResponse {
        providers: state.registry.validate_all_credentials().await,
    })
}
