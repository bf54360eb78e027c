//! Operator-facing JSON API served by the master.
//!
//! - `GET /iterations/{id}/status` - `{ "iteration_id", "status" }`
//! - `GET /rounds/{id}/statuses` - `{ "<iteration id>": "<status>", ... }`
//! - `GET /metrics` - cluster-wide snapshot of every iteration
//!
//! Unknown or malformed ids answer with a JSON `{ "error": ... }` body.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::cluster::{collect_snapshot, EntityDiscovery, MetricsQueryService};
use crate::domain::{EntityExecutionStatus, Plan};
use crate::metrics::IterationSnapshot;
use crate::monitor::IterationStatusMonitor;

/// Shared state for the operator API handlers.
pub struct ApiState {
    pub plan: Arc<Plan>,
    pub discovery: Arc<EntityDiscovery>,
    pub statuses: Arc<IterationStatusMonitor>,
    pub metrics: Arc<dyn MetricsQueryService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationStatusResponse {
    pub iteration_id: Uuid,
    pub status: EntityExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationMetricsEntry {
    pub fully_qualified_name: String,
    pub metrics: IterationSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ApiErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiErrorBody {
            error: message.into(),
        }),
    )
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("invalid id '{raw}'")))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/iterations/{id}/status", get(iteration_status))
        .route("/rounds/{id}/statuses", get(round_statuses))
        .route("/metrics", get(all_metrics))
        .with_state(state)
}

async fn iteration_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<IterationStatusResponse>, ApiError> {
    let id = parse_id(&id)?;
    let iteration = state
        .plan
        .iteration(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("iteration {id} not found")))?;
    Ok(Json(IterationStatusResponse {
        iteration_id: id,
        status: state.statuses.status(iteration).await,
    }))
}

async fn round_statuses(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<BTreeMap<Uuid, EntityExecutionStatus>>, ApiError> {
    let id = parse_id(&id)?;
    let round = state
        .plan
        .round(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("round {id} not found")))?;
    Ok(Json(state.statuses.round_statuses(round).await))
}

async fn all_metrics(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<IterationMetricsEntry>>, ApiError> {
    let reads = state.plan.iterations().filter_map(|it| {
        let record = state.discovery.find_by_id(it.id())?;
        let metrics = state.metrics.clone();
        Some(async move {
            collect_snapshot(metrics.as_ref(), record.iteration_id, &record.fully_qualified_name)
                .await
                .map(|snapshot| IterationMetricsEntry {
                    fully_qualified_name: record.fully_qualified_name,
                    metrics: snapshot,
                })
        })
    });

    join_all(reads)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e.to_string()))
}
