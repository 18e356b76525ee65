//! Per-workflow webhook registration and delivery counters.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use stagehand_core::workflow::gateway::WORKFLOWS_PATH;
use stagehand_types::webhook::DeliveryStats;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for registering a webhook.
#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub url: String,
}

/// PUT /api/v1/workflows/{task_id}/webhook - Register or replace the webhook.
pub async fn register_webhook(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    payload: Result<Json<RegisterWebhookRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let Json(body) = payload?;

    state.gateway.register_webhook(&task_id, &body.url).await?;
    tracing::info!(task_id = %task_id, url = %body.url, "webhook registered");

    let resp = ApiResponse::success(
        serde_json::json!({ "task_id": task_id, "url": body.url, "registered": true }),
        start,
    )
    .with_link("stats", format!("{WORKFLOWS_PATH}/{task_id}/webhook/stats"));
    Ok(Json(resp))
}

/// DELETE /api/v1/workflows/{task_id}/webhook - Remove the webhook.
pub async fn unregister_webhook(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();

    let removed = state.gateway.unregister_webhook(&task_id);
    let resp = ApiResponse::success(
        serde_json::json!({ "task_id": task_id, "removed": removed }),
        start,
    );
    Ok(Json(resp))
}

/// GET /api/v1/workflows/{task_id}/webhook/stats - Delivery counters.
///
/// Counters survive unregistration; an id that never had a webhook reports zeros.
pub async fn get_webhook_stats(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<DeliveryStats>>, AppError> {
    let start = Instant::now();
    let stats = state.gateway.webhook_stats(&task_id);
    Ok(Json(ApiResponse::success(stats, start)))
}
