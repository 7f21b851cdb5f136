//! Aggregation and read-side handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{ClientId, CycleAggregate, CycleWindow, QuarantinedEvent, TenantId};

use crate::auth::ServiceAuth;
use crate::engine::{AggregationReport, AggregationRequest};
use crate::error::ApiError;
use crate::state::AppState;

/// Run the aggregation engine for a cycle.
pub async fn run_aggregation(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<AggregationRequest>,
) -> Result<Json<AggregationReport>, ApiError> {
    tracing::info!(
        service = %auth.service_name,
        tenant_id = %body.tenant_id,
        cycle_start = %body.cycle_start,
        cycle_end = %body.cycle_end,
        "Aggregation requested"
    );
    Ok(Json(state.aggregations.run(&body)?))
}

/// Tenant/client/cycle scope of a read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleQuery {
    /// Tenant.
    pub tenant_id: TenantId,
    /// Client; all clients when absent.
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// Start of the cycle (inclusive).
    pub cycle_start: DateTime<Utc>,
    /// End of the cycle (exclusive).
    pub cycle_end: DateTime<Utc>,
}

impl CycleQuery {
    fn window(&self) -> Result<CycleWindow, ApiError> {
        Ok(CycleWindow::new(self.cycle_start, self.cycle_end)?)
    }
}

/// Aggregates of a cycle.
#[derive(Debug, Serialize)]
pub struct AggregatesResponse {
    /// Stored aggregates.
    pub aggregates: Vec<CycleAggregate>,
}

/// Read stored aggregates.
pub async fn list_aggregates(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Query(query): Query<CycleQuery>,
) -> Result<Json<AggregatesResponse>, ApiError> {
    let window = query.window()?;
    let aggregates =
        state
            .store
            .aggregates_for_cycle(&query.tenant_id, query.client_id.as_ref(), &window)?;
    Ok(Json(AggregatesResponse { aggregates }))
}

/// Quarantined events of a cycle.
#[derive(Debug, Serialize)]
pub struct QuarantineResponse {
    /// Quarantined events.
    pub events: Vec<QuarantinedEvent>,
}

/// List quarantined events.
pub async fn list_quarantine(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Query(query): Query<CycleQuery>,
) -> Result<Json<QuarantineResponse>, ApiError> {
    let window = query.window()?;
    let events =
        state
            .store
            .quarantined_in_window(&query.tenant_id, query.client_id.as_ref(), &window)?;
    Ok(Json(QuarantineResponse { events }))
}
