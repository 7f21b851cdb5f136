//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{aggregations, collections, events, health, providers};
use crate::state::AppState;

/// Maximum concurrent requests on the ingestion endpoint.
const INGEST_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Providers (Service API Key auth)
/// - `GET /v1/providers` - Registered providers, metrics and rate limits
/// - `GET /v1/providers/health` - Credential probe per provider
///
/// ## Collections (Service API Key auth)
/// - `POST /v1/collections` - Start or resume a run
/// - `POST /v1/collections/batch` - One run per provider for a tenant/client
/// - `GET /v1/collections/:correlation_id` - Latest run
/// - `GET /v1/collections/:correlation_id/attempts` - Every attempt
/// - `POST /v1/collections/:correlation_id/cancel` - Cancel a live run
///
/// ## Events (Service API Key auth, rate-limited)
/// - `POST /v1/events` - Ingest canonical events
///
/// ## Aggregation (Service API Key auth)
/// - `POST /v1/aggregations` - Aggregate a cycle
/// - `GET /v1/aggregates` - Stored aggregates of a cycle
/// - `GET /v1/quarantine` - Quarantined events of a cycle
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let event_routes = Router::new()
        .route("/", post(events::ingest_events))
        .layer(ConcurrencyLimitLayer::new(INGEST_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Providers
        .route("/providers", get(providers::list_providers))
        .route("/providers/health", get(providers::provider_health))
        // Collections
        .route("/collections", post(collections::trigger_collection))
        .route("/collections/batch", post(collections::trigger_batch))
        .route(
            "/collections/:correlation_id",
            get(collections::get_collection),
        )
        .route(
            "/collections/:correlation_id/attempts",
            get(collections::list_attempts),
        )
        .route(
            "/collections/:correlation_id/cancel",
            post(collections::cancel_collection),
        )
        // Aggregation
        .route("/aggregations", post(aggregations::run_aggregation))
        .route("/aggregates", get(aggregations::list_aggregates))
        .route("/quarantine", get(aggregations::list_quarantine))
        .nest("/events", event_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
