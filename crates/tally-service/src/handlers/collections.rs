//! Collection trigger and run status handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{ClientId, CollectionRun, CorrelationId, ProviderId, TenantId};

use super::parse_id;
use crate::auth::ServiceAuth;
use crate::engine::CollectionRequest;
use crate::error::ApiError;
use crate::state::AppState;

/// Trigger request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    /// What to collect.
    #[serde(flatten)]
    pub collection: CollectionRequest,
    /// Wait for the run to finish instead of answering 202 at once.
    #[serde(default)]
    pub wait: bool,
}

/// Start (or resume) a collection run.
pub async fn trigger_collection(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<CollectionRun>), ApiError> {
    tracing::info!(
        service = %auth.service_name,
        provider = %body.collection.provider,
        tenant_id = %body.collection.tenant_id,
        correlation_id = %body.collection.correlation_id,
        "Collection requested"
    );

    if body.wait {
        let run = state.collections.run_collection(&body.collection).await?;
        Ok((StatusCode::OK, Json(run)))
    } else {
        let run = state.collections.trigger(&body.collection)?;
        Ok((StatusCode::ACCEPTED, Json(run)))
    }
}

/// Batch trigger request: one run per provider for the same scope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTriggerRequest {
    /// Tenant to collect for.
    pub tenant_id: TenantId,
    /// Client to collect for.
    pub client_id: ClientId,
    /// Start of the window (inclusive).
    pub window_start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub window_end: DateTime<Utc>,
    /// Base correlation ID; each provider's run uses `<base>:<provider>`.
    pub correlation_id: CorrelationId,
    /// Providers to collect; every registered provider when empty.
    #[serde(default)]
    pub providers: Vec<ProviderId>,
    /// Wait for every run to finish.
    #[serde(default)]
    pub wait: bool,
}

/// A provider whose run could not be started.
#[derive(Debug, Serialize)]
pub struct BatchError {
    /// Provider.
    pub provider: ProviderId,
    /// Why the run was not started.
    pub message: String,
}

/// Batch trigger response.
#[derive(Debug, Serialize)]
pub struct BatchTriggerResponse {
    /// Started or existing runs.
    pub runs: Vec<CollectionRun>,
    /// Providers that were rejected.
    pub errors: Vec<BatchError>,
}

/// Trigger several providers for one tenant/client in parallel.
pub async fn trigger_batch(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<BatchTriggerRequest>,
) -> Result<(StatusCode, Json<BatchTriggerResponse>), ApiError> {
    let providers = if body.providers.is_empty() {
        state.registry.available_providers()
    } else {
        body.providers.clone()
    };
    tracing::info!(
        service = %auth.service_name,
        tenant_id = %body.tenant_id,
        correlation_id = %body.correlation_id,
        providers = providers.len(),
        "Batch collection requested"
    );

    let requests = providers
        .into_iter()
        .map(|provider| {
            let correlation_id: CorrelationId =
                parse_id(&format!("{}:{provider}", body.correlation_id), "correlation id")?;
            Ok(CollectionRequest {
                provider,
                tenant_id: body.tenant_id.clone(),
                client_id: body.client_id.clone(),
                window_start: body.window_start,
                window_end: body.window_end,
                correlation_id,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let results = if body.wait {
        state.collections.run_batch(&requests).await
    } else {
        requests
            .iter()
            .map(|r| state.collections.trigger(r))
            .collect()
    };

    let mut response = BatchTriggerResponse {
        runs: Vec::new(),
        errors: Vec::new(),
    };
    for (request, result) in requests.into_iter().zip(results) {
        match result {
            Ok(run) => response.runs.push(run),
            Err(e) => response.errors.push(BatchError {
                provider: request.provider,
                message: e.to_string(),
            }),
        }
    }

    let status = if body.wait {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(response)))
}

/// Latest run of a correlation ID.
pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(correlation_id): Path<String>,
) -> Result<Json<CollectionRun>, ApiError> {
    let correlation_id: CorrelationId = parse_id(&correlation_id, "correlation id")?;
    Ok(Json(state.collections.latest_run(&correlation_id)?))
}

/// Every attempt of a correlation ID, oldest first.
pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(correlation_id): Path<String>,
) -> Result<Json<Vec<CollectionRun>>, ApiError> {
    let correlation_id: CorrelationId = parse_id(&correlation_id, "correlation id")?;
    Ok(Json(state.collections.attempts(&correlation_id)?))
}

/// Cancel a live run.
pub async fn cancel_collection(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(correlation_id): Path<String>,
) -> Result<Json<CollectionRun>, ApiError> {
    let correlation_id: CorrelationId = parse_id(&correlation_id, "correlation id")?;
    tracing::info!(
        service = %auth.service_name,
        correlation_id = %correlation_id,
        "Cancellation requested"
    );
    Ok(Json(state.collections.cancel(&correlation_id)?))
}
