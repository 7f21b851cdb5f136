//! Tally HTTP client implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tally_core::{CollectionRun, CorrelationId, ProviderId, UsageEvent};

use crate::error::ClientError;
use crate::types::{
    AggregationReport, AggregationRequest, ApiErrorResponse, BatchCollectionRequest,
    BatchCollectionResponse, CollectionRequest, IngestBody, IngestResponse,
    ProviderHealthResponse, TriggerBody,
};

/// Tally API client.
///
/// Triggers collection runs, pushes canonical events and runs cycle aggregation.
#[derive(Debug, Clone)]
pub struct TallyClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl TallyClient {
    /// Create a new tally client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the tally service (e.g., `"http://tally:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new tally client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Start a collection run and return at once with the run in its initial state.
    ///
    /// Triggering a correlation ID that already completed returns the completed run.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Conflict` if the correlation ID belongs to different
    /// collection parameters.
    pub async fn trigger_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<CollectionRun, ClientError> {
        self.post_collection(request, false).await
    }

    /// Run a collection to completion and return the finished run.
    ///
    /// Provider failures are reported on the run, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn run_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<CollectionRun, ClientError> {
        self.post_collection(request, true).await
    }

    async fn post_collection(
        &self,
        request: &CollectionRequest,
        wait: bool,
    ) -> Result<CollectionRun, ClientError> {
        let body = TriggerBody {
            collection: request,
            wait,
        };
        let response = self
            .authorized(self.client.post(self.url("/v1/collections")))
            .json(&body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Collect several providers for one tenant/client.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn trigger_batch(
        &self,
        request: &BatchCollectionRequest,
    ) -> Result<BatchCollectionResponse, ClientError> {
        let response = self
            .authorized(self.client.post(self.url("/v1/collections/batch")))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Latest run of a correlation ID.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if no run exists for the correlation ID.
    pub async fn get_run(&self, correlation_id: &CorrelationId) -> Result<CollectionRun, ClientError> {
        let url = self.url(&format!("/v1/collections/{correlation_id}"));
        let response = self.authorized(self.client.get(url)).send().await?;

        self.handle_response(response).await
    }

    /// Every attempt of a correlation ID, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_attempts(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<CollectionRun>, ClientError> {
        let url = self.url(&format!("/v1/collections/{correlation_id}/attempts"));
        let response = self.authorized(self.client.get(url)).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a live run. Pages already persisted are kept.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for an unknown correlation ID and
    /// `ClientError::Conflict` if the run already finished.
    pub async fn cancel_run(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<CollectionRun, ClientError> {
        let url = self.url(&format!("/v1/collections/{correlation_id}/cancel"));
        let response = self.authorized(self.client.post(url)).send().await?;

        self.handle_response(response).await
    }

    /// Push canonical events collected outside the service.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::PersistenceFailure` if the batch was not stored; resending
    /// it with the same correlation ID is safe.
    pub async fn ingest_events(
        &self,
        correlation_id: &CorrelationId,
        events: &[UsageEvent],
    ) -> Result<IngestResponse, ClientError> {
        tracing::debug!(correlation_id = %correlation_id, events = events.len(), "Ingesting events");
        let body = IngestBody {
            correlation_id,
            events,
        };
        let response = self
            .authorized(self.client.post(self.url("/v1/events")))
            .json(&body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Aggregate a billing cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn run_aggregation(
        &self,
        request: &AggregationRequest,
    ) -> Result<AggregationReport, ClientError> {
        let response = self
            .authorized(self.client.post(self.url("/v1/aggregations")))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Credential health of every registered provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn provider_health(&self) -> Result<BTreeMap<ProviderId, bool>, ClientError> {
        let response = self
            .authorized(self.client.get(self.url("/v1/providers/health")))
            .send()
            .await?;

        let health: ProviderHealthResponse = self.handle_response(response).await?;
        Ok(health.providers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let Ok(api_error) = response.json::<ApiErrorResponse>().await else {
            return Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            });
        };

        let body = api_error.error;
        match body.code.as_str() {
            "not_found" => Err(ClientError::NotFound {
                message: body.message,
            }),
            "conflict" => Err(ClientError::Conflict {
                message: body.message,
            }),
            "persistence_failure" => {
                let correlation_id = body
                    .details
                    .as_ref()
                    .and_then(|d| d.get("correlationId"))
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Err(ClientError::PersistenceFailure { correlation_id })
            }
            _ => Err(ClientError::Api {
                code: body.code,
                message: body.message,
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = TallyClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.url("/v1/events"), "http://localhost:8080/v1/events");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("billing-scheduler");
        let client = TallyClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "billing-scheduler");
    }
}
