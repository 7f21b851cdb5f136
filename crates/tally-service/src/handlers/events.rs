//! Direct ingestion of canonical usage events.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tally_core::CorrelationId;

use crate::auth::ServiceAuth;
use crate::engine::WriteOutcome;
use crate::error::ApiError;
use crate::state::AppState;

/// Ingest request. Events are raw JSON so that schema failures can be quarantined.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Batch correlation ID; generated when absent.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// Canonical wire-format events.
    pub events: Vec<serde_json::Value>,
}

/// Ingest response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Batch correlation ID, for replaying the batch.
    pub correlation_id: CorrelationId,
    /// Write counts.
    #[serde(flatten)]
    pub outcome: WriteOutcome,
}

/// Persist canonical events produced outside the engine.
pub async fn ingest_events(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let correlation_id = match body.correlation_id {
        Some(id) => id,
        None => CorrelationId::new(format!("ingest-{}", uuid::Uuid::new_v4()))
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    };
    tracing::debug!(
        service = %auth.service_name,
        correlation_id = %correlation_id,
        events = body.events.len(),
        "Ingesting events"
    );

    let outcome = state.writer.ingest(body.events, &correlation_id)?;
    Ok(Json(IngestResponse {
        correlation_id,
        outcome,
    }))
}
