//! Collection and aggregation integration tests.

mod common;

use axum::http::StatusCode;
use common::{aggregation_body, collection_body, retell_call, TestHarness};
use serde_json::{json, Value};

async fn collect(harness: &TestHarness, correlation_id: &str) -> Value {
    let response = harness
        .server
        .post("/v1/collections")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&collection_body(correlation_id))
        .await;
    response.assert_status_ok();
    response.json()
}

async fn aggregate(harness: &TestHarness) -> Value {
    let response = harness
        .server
        .post("/v1/aggregations")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&aggregation_body())
        .await;
    response.assert_status_ok();
    response.json()
}

// ============================================================================
// Collect then aggregate
// ============================================================================

#[tokio::test]
async fn collected_call_aggregates_to_vendor_cost() {
    let harness = TestHarness::new().await;
    harness
        .mock_retell_calls(json!([retell_call("call_123", 330_000)]))
        .await;

    let run = collect(&harness, "corr-1").await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["eventsCollected"], 1);
    assert_eq!(run["eventsProcessed"], 1);
    assert_eq!(run["attempt"], 1);

    let report = aggregate(&harness).await;
    let aggregate = &report["aggregates"][0];
    assert_eq!(aggregate["metricKey"], "retell.call_minutes");
    assert_eq!(aggregate["totalQuantity"], "5.5");
    assert_eq!(aggregate["totalCost"], "0.275");
    assert_eq!(aggregate["currency"], "USD");
    assert_eq!(aggregate["eventCount"], 1);
    assert_eq!(report["eventsAggregated"], 1);
}

#[tokio::test]
async fn recollecting_a_window_adds_nothing() {
    let harness = TestHarness::new().await;
    harness
        .mock_retell_calls(json!([
            retell_call("call_1", 60_000),
            retell_call("call_2", 120_000)
        ]))
        .await;

    let first = collect(&harness, "corr-1").await;
    assert_eq!(first["eventsProcessed"], 2);
    let before = aggregate(&harness).await;

    // A new correlation ID over the same window sees only duplicates.
    let second = collect(&harness, "corr-2").await;
    assert_eq!(second["eventsProcessed"], 0);
    assert_eq!(second["eventsDuplicate"], 2);

    let after = aggregate(&harness).await;
    assert_eq!(
        before["aggregates"][0]["totalCost"],
        after["aggregates"][0]["totalCost"]
    );
    assert_eq!(after["aggregates"][0]["eventCount"], 2);
}

#[tokio::test]
async fn retriggering_a_completed_run_returns_it() {
    let harness = TestHarness::new().await;
    harness
        .mock_retell_calls(json!([retell_call("call_1", 60_000)]))
        .await;

    let first = collect(&harness, "corr-1").await;
    let second = collect(&harness, "corr-1").await;
    assert_eq!(first["runId"], second["runId"]);

    let response = harness
        .server
        .get("/v1/collections/corr-1")
        .add_header("x-api-key", &harness.service_api_key)
        .await;
    response.assert_status_ok();
    let run: Value = response.json();
    assert_eq!(run["runId"], first["runId"]);

    let response = harness
        .server
        .get("/v1/collections/corr-1/attempts")
        .add_header("x-api-key", &harness.service_api_key)
        .await;
    let attempts: Vec<Value> = response.json();
    assert_eq!(attempts.len(), 1);
}

#[tokio::test]
async fn stored_aggregates_can_be_read_back() {
    let harness = TestHarness::new().await;
    harness
        .mock_retell_calls(json!([retell_call("call_1", 60_000)]))
        .await;
    collect(&harness, "corr-1").await;
    aggregate(&harness).await;

    let response = harness
        .server
        .get("/v1/aggregates")
        .add_query_param("tenantId", "t1")
        .add_query_param("cycleStart", "2025-03-01T00:00:00Z")
        .add_query_param("cycleEnd", "2025-04-01T00:00:00Z")
        .add_header("x-api-key", &harness.service_api_key)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["aggregates"].as_array().unwrap().len(), 1);
    assert_eq!(body["aggregates"][0]["totalQuantity"], "1");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn rejected_credentials_fail_the_run() {
    let harness = TestHarness::new().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/v2/list-calls"))
        .respond_with(wiremock::ResponseTemplate::new(401))
        .mount(&harness.vendor)
        .await;

    let run = collect(&harness, "corr-1").await;
    assert_eq!(run["status"], "failed");
    assert_eq!(run["error"]["kind"], "authentication_failure");
}

#[tokio::test]
async fn provider_without_credentials_fails_the_run() {
    let harness = TestHarness::new().await;
    let mut body = collection_body("corr-1");
    body["provider"] = json!("openrouter");

    let response = harness
        .server
        .post("/v1/collections")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&body)
        .await;

    response.assert_status_ok();
    let run: Value = response.json();
    assert_eq!(run["status"], "failed");
    assert_eq!(run["error"]["kind"], "authentication_failure");
}

#[tokio::test]
async fn unknown_provider_is_recorded_as_failed_run() {
    let harness = TestHarness::new().await;
    let mut body = collection_body("corr-1");
    body["provider"] = json!("acme");

    let response = harness
        .server
        .post("/v1/collections")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&body)
        .await;

    let run: Value = response.json();
    assert_eq!(run["status"], "failed");
    assert_eq!(run["error"]["kind"], "unknown_provider");
}

#[tokio::test]
async fn correlation_reuse_with_other_scope_conflicts() {
    let harness = TestHarness::new().await;
    harness.mock_retell_calls(json!([])).await;
    collect(&harness, "corr-1").await;

    let mut body = collection_body("corr-1");
    body["clientId"] = json!("c2");
    let response = harness
        .server
        .post("/v1/collections")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&body)
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn inverted_window_is_a_bad_request() {
    let harness = TestHarness::new().await;
    let mut body = collection_body("corr-1");
    body["windowEnd"] = json!("2025-02-01T00:00:00Z");

    let response = harness
        .server
        .post("/v1/collections")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&body)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_and_finished_runs_cannot_be_cancelled() {
    let harness = TestHarness::new().await;
    harness.mock_retell_calls(json!([])).await;

    let response = harness
        .server
        .post("/v1/collections/nope/cancel")
        .add_header("x-api-key", &harness.service_api_key)
        .await;
    response.assert_status_not_found();

    collect(&harness, "corr-1").await;
    let response = harness
        .server
        .post("/v1/collections/corr-1/cancel")
        .add_header("x-api-key", &harness.service_api_key)
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

// ============================================================================
// Batch
// ============================================================================

#[tokio::test]
async fn batch_runs_one_collection_per_provider() {
    let harness = TestHarness::new().await;
    harness
        .mock_retell_calls(json!([retell_call("call_1", 60_000)]))
        .await;

    let response = harness
        .server
        .post("/v1/collections/batch")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "tenantId": "t1",
            "clientId": "c1",
            "windowStart": "2025-03-01T00:00:00Z",
            "windowEnd": "2025-04-01T00:00:00Z",
            "correlationId": "nightly",
            "providers": ["retell", "twilio"],
            "wait": true
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let runs = body["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["correlationId"], "nightly:retell");
    assert_eq!(runs[0]["status"], "completed");
    // No Twilio credential is configured.
    assert_eq!(runs[1]["correlationId"], "nightly:twilio");
    assert_eq!(runs[1]["status"], "failed");
}

#[cfg(feature = "rocksdb-backend")]
#[tokio::test]
async fn collected_events_survive_a_restart() {
    use std::sync::Arc;
    use tally_store::RocksStore;

    let dir = tempfile::TempDir::new().unwrap();
    {
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let harness = TestHarness::with_store(store).await;
        harness
            .mock_retell_calls(json!([retell_call("call_1", 60_000)]))
            .await;
        collect(&harness, "corr-1").await;
    }

    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let harness = TestHarness::with_store(store).await;
    harness
        .mock_retell_calls(json!([retell_call("call_1", 60_000)]))
        .await;

    // Fresh seen-set, same store: the unique constraint still drops the replay.
    let run = collect(&harness, "corr-2").await;
    assert_eq!(run["eventsProcessed"], 0);
    assert_eq!(run["eventsDuplicate"], 1);

    let report = aggregate(&harness).await;
    assert_eq!(report["aggregates"][0]["eventCount"], 1);
}
