//! Common test utilities for tally integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tally_collectors::PriceQuote;
use tally_core::{Decimal, ProviderId};
use tally_service::config::{CredentialConfig, ProviderEndpoints, SecretEntry};
use tally_service::{create_router, AppState, ServiceConfig};
use tally_store::{MemoryStore, Store};

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Mocked vendor APIs; every provider points here.
    pub vendor: MockServer,
    /// The backing store.
    pub store: Arc<dyn Store>,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
}

impl TestHarness {
    /// Create a harness with an in-memory store and a Retell credential.
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    /// Create a harness around an existing store.
    pub async fn with_store(store: Arc<dyn Store>) -> Self {
        let vendor = MockServer::start().await;
        let service_api_key = "test-service-key".to_string();

        let config = test_config(&vendor.uri(), &service_api_key);
        let state = AppState::new(Arc::clone(&store), config).expect("Failed to build state");
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            vendor,
            store,
            service_api_key,
        }
    }

    /// Serve `calls` from the mocked Retell list-calls endpoint.
    pub async fn mock_retell_calls(&self, calls: Value) {
        Mock::given(method("POST"))
            .and(path("/v2/list-calls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(calls))
            .mount(&self.vendor)
            .await;
    }
}

/// Service configuration pointing every provider at `vendor_url`.
pub fn test_config(vendor_url: &str, service_api_key: &str) -> ServiceConfig {
    let mut credentials = CredentialConfig::default();
    credentials.providers.insert(
        "retell".into(),
        SecretEntry {
            api_key: "retell-key".into(),
            account_id: None,
        },
    );

    let retell_prices = BTreeMap::from([(
        "retell.call_minutes".to_string(),
        PriceQuote::new(Decimal::from_str("0.05").unwrap(), "USD"),
    )]);

    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        service_api_key: Some(service_api_key.to_string()),
        providers: ProviderEndpoints {
            retell_base_url: vendor_url.to_string(),
            twilio_base_url: vendor_url.to_string(),
            openrouter_base_url: vendor_url.to_string(),
        },
        credentials,
        pricing: BTreeMap::from([(ProviderId::new("retell").unwrap(), retell_prices)]),
        ..ServiceConfig::default()
    }
}

/// A Retell call record on 2025-03-10.
pub fn retell_call(id: &str, duration_ms: i64) -> Value {
    json!({
        "call_id": id,
        "agent_id": "ag_1",
        "start_timestamp": Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap().timestamp_millis(),
        "duration_ms": duration_ms,
    })
}

/// Collection request body for March 2025.
pub fn collection_body(correlation_id: &str) -> Value {
    json!({
        "provider": "retell",
        "tenantId": "t1",
        "clientId": "c1",
        "windowStart": "2025-03-01T00:00:00Z",
        "windowEnd": "2025-04-01T00:00:00Z",
        "correlationId": correlation_id,
        "wait": true
    })
}

/// Aggregation request body for March 2025.
pub fn aggregation_body() -> Value {
    json!({
        "tenantId": "t1",
        "clientId": "c1",
        "cycleStart": "2025-03-01T00:00:00Z",
        "cycleEnd": "2025-04-01T00:00:00Z"
    })
}
