//! Provider collectors.

pub mod openrouter;
pub mod retell;
pub mod twilio;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::{ClientAgentMapping, MetricKey, ProviderId};

use crate::collector::{CollectParams, CollectPerformance};
use crate::credentials::CredentialVault;
use crate::directory::AgentDirectory;
use crate::error::CollectorError;
use crate::http::{QuotaStatus, VendorHttp};
use crate::throttle::ProviderThrottle;

pub use openrouter::{OpenRouterCollector, OpenRouterPricing};
pub use retell::RetellCollector;
pub use twilio::TwilioCollector;

/// Collaborators every collector needs.
#[derive(Clone)]
pub struct CollectorDeps {
    /// Credential service.
    pub vault: Arc<dyn CredentialVault>,
    /// Agent directory service.
    pub directory: Arc<dyn AgentDirectory>,
    /// Shared per-provider buckets.
    pub throttle: Arc<ProviderThrottle>,
    /// Timeout of a single vendor call.
    pub request_timeout: Duration,
}

impl CollectorDeps {
    pub(crate) fn http(
        &self,
        provider: &ProviderId,
        base_url: &str,
    ) -> Result<VendorHttp, CollectorError> {
        Ok(VendorHttp::new(provider.clone(), base_url, self.request_timeout)?
            .with_throttle(Arc::clone(&self.throttle)))
    }
}

pub(crate) fn provider_id(name: &str) -> Result<ProviderId, CollectorError> {
    ProviderId::new(name).map_err(|e| CollectorError::Configuration(e.to_string()))
}

pub(crate) fn metric_key(provider: &ProviderId, metric: &str) -> Result<MetricKey, CollectorError> {
    MetricKey::for_provider(provider, metric)
        .map_err(|e| CollectorError::Configuration(e.to_string()))
}

/// Mappings of the collected client, used both to scope vendor queries and to
/// attribute records to agents.
pub(crate) async fn client_mappings(
    directory: &dyn AgentDirectory,
    params: &CollectParams,
    provider: &ProviderId,
) -> Result<Vec<ClientAgentMapping>, CollectorError> {
    let mappings = directory
        .mappings(&params.tenant_id, &params.client_id, provider)
        .await?;
    Ok(mappings.into_iter().filter(|m| m.active).collect())
}

/// Whether a vendor record with this external identifier belongs to the client.
///
/// A client without mappings owns every record of the tenant's account.
pub(crate) fn owned_by_client(mappings: &[ClientAgentMapping], external_id: Option<&str>) -> bool {
    mappings.is_empty()
        || external_id.is_some_and(|id| mappings.iter().any(|m| m.external_agent_id == id))
}

pub(crate) fn performance(started: Instant, api_calls: u32, quota: QuotaStatus) -> CollectPerformance {
    CollectPerformance {
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        api_call_count: api_calls,
        rate_limit_remaining: quota.remaining,
        rate_limit_reset_at: quota.reset_at,
    }
}

/// Turn a credential probe into the `validateCredentials` answer.
pub(crate) fn probe_outcome<T>(result: Result<T, CollectorError>) -> Result<bool, CollectorError> {
    match result {
        Ok(_) => Ok(true),
        Err(CollectorError::AuthenticationFailure(reason)) => {
            tracing::debug!(reason = %reason, "Credential probe rejected");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
