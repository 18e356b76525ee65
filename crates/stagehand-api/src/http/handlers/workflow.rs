//! Workflow lifecycle handlers: start, status poll, cancel, result.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use stagehand_core::workflow::gateway::WORKFLOWS_PATH;
use stagehand_core::workflow::{StartRequest, StartResponse, StatusView};
use stagehand_types::workflow::WorkflowResult;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/workflows - Admit and launch a workflow.
///
/// Returns 202 as soon as the workflow is scheduled; progress is available
/// on the `stream_url` and via status polling.
pub async fn start_workflow(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<StartResponse>>), AppError> {
    let start = Instant::now();
    let Json(body) = payload?;

    let started = state.gateway.start(body).await?;
    let self_link = format!("{WORKFLOWS_PATH}/{}", started.task_id);
    let result_link = format!("{self_link}/result");
    let events_link = started.stream_url.clone();

    let resp = ApiResponse::success(started, start)
        .with_link("self", self_link)
        .with_link("result", result_link)
        .with_link("events", events_link);

    Ok((StatusCode::ACCEPTED, Json(resp)))
}

/// GET /api/v1/workflows/{task_id} - Status poll.
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<StatusView>>, AppError> {
    let start = Instant::now();

    let view = state
        .gateway
        .status(&task_id)
        .await
        .ok_or_else(|| AppError::workflow_not_found(&task_id))?;

    let resp = ApiResponse::success(view, start)
        .with_link("self", format!("{WORKFLOWS_PATH}/{task_id}"));
    Ok(Json(resp))
}

/// POST /api/v1/workflows/{task_id}/cancel - Mark a running workflow cancelled.
///
/// Answers `{cancelled: false}` for unknown or non-running workflows.
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();

    let cancelled = state.gateway.cancel(&task_id).await;
    let resp = ApiResponse::success(
        serde_json::json!({ "task_id": task_id, "cancelled": cancelled }),
        start,
    );
    Ok(Json(resp))
}

/// GET /api/v1/workflows/{task_id}/result - Stored result of a finished workflow.
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowResult>>, AppError> {
    let start = Instant::now();

    let result = state
        .gateway
        .result(&task_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No result for workflow '{task_id}'")))?;

    let resp = ApiResponse::success(result, start)
        .with_link("workflow", format!("{WORKFLOWS_PATH}/{task_id}"));
    Ok(Json(resp))
}
