//! Health endpoint: executor liveness and registry/stream occupancy.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use stagehand_core::workflow::HealthView;

use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/health
///
/// 503 when the executor is not running, since no workflow could be started.
pub async fn get_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthView>>) {
    let start = Instant::now();
    let health = state.gateway.health().await;
    let status = if health.executor_running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(health, start)))
}
