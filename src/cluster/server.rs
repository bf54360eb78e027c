//! HTTP server side of the RPC layer.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::rpc::{
    EntityQuery, HealthResponse, IterationTerminationService, MetricsQueryService,
    MonitorService, RpcErrorBody, StatusesResponse, TerminationResponse, HEALTH_PATH,
    METRICS_DATA_TRANSMISSION_PATH, METRICS_DURATION_PATH, METRICS_RESPONSE_CODES_PATH,
    METRICS_THROUGHPUT_PATH, MONITOR_STATUSES_PATH, TERMINATION_PATH,
};
use crate::error::RpcError;
use crate::metrics::{
    DataTransmissionMetrics, DurationMetrics, ResponseCodeMetrics, ThroughputMetrics,
};

/// Services exposed to remote nodes.
pub struct RpcState {
    pub node_id: String,
    pub monitor: Arc<dyn MonitorService>,
    pub metrics: Arc<dyn MetricsQueryService>,
    pub termination: Arc<dyn IterationTerminationService>,
}

type RpcResult<T> = Result<Json<T>, (StatusCode, Json<RpcErrorBody>)>;

fn failure(err: RpcError) -> (StatusCode, Json<RpcErrorBody>) {
    let status = match err {
        RpcError::NotFound { .. } => StatusCode::NOT_FOUND,
        RpcError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(RpcErrorBody {
            error: err.to_string(),
        }),
    )
}

/// Builds the `/rpc` router.
pub fn router(state: Arc<RpcState>) -> Router {
    Router::new()
        .route(MONITOR_STATUSES_PATH, post(iteration_statuses))
        .route(METRICS_DURATION_PATH, post(duration_metrics))
        .route(METRICS_RESPONSE_CODES_PATH, post(response_code_metrics))
        .route(METRICS_THROUGHPUT_PATH, post(throughput_metrics))
        .route(METRICS_DATA_TRANSMISSION_PATH, post(data_transmission_metrics))
        .route(TERMINATION_PATH, post(is_terminated))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

async fn iteration_statuses(
    State(state): State<Arc<RpcState>>,
    Json(query): Json<EntityQuery>,
) -> RpcResult<StatusesResponse> {
    let statuses = state
        .monitor
        .query_iteration_statuses(&query.fully_qualified_name)
        .await
        .map_err(failure)?;
    Ok(Json(StatusesResponse { statuses }))
}

async fn duration_metrics(
    State(state): State<Arc<RpcState>>,
    Json(query): Json<EntityQuery>,
) -> RpcResult<DurationMetrics> {
    state
        .metrics
        .get_duration_metrics(&query.fully_qualified_name)
        .await
        .map(Json)
        .map_err(failure)
}

async fn response_code_metrics(
    State(state): State<Arc<RpcState>>,
    Json(query): Json<EntityQuery>,
) -> RpcResult<ResponseCodeMetrics> {
    state
        .metrics
        .get_response_code_metrics(&query.fully_qualified_name)
        .await
        .map(Json)
        .map_err(failure)
}

async fn throughput_metrics(
    State(state): State<Arc<RpcState>>,
    Json(query): Json<EntityQuery>,
) -> RpcResult<ThroughputMetrics> {
    state
        .metrics
        .get_throughput_metrics(&query.fully_qualified_name)
        .await
        .map(Json)
        .map_err(failure)
}

async fn data_transmission_metrics(
    State(state): State<Arc<RpcState>>,
    Json(query): Json<EntityQuery>,
) -> RpcResult<DataTransmissionMetrics> {
    state
        .metrics
        .get_data_transmission_metrics(&query.fully_qualified_name)
        .await
        .map(Json)
        .map_err(failure)
}

async fn is_terminated(
    State(state): State<Arc<RpcState>>,
    Json(query): Json<EntityQuery>,
) -> RpcResult<TerminationResponse> {
    let terminated = state
        .termination
        .is_terminated(&query.fully_qualified_name)
        .await
        .map_err(failure)?;
    Ok(Json(TerminationResponse { terminated }))
}

async fn health(State(state): State<Arc<RpcState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node_id.clone(),
    })
}
