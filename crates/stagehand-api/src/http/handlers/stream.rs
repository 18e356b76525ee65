//! SSE progress stream for one workflow.
//!
//! GET /api/v1/workflows/{task_id}/events
//!
//! Each progress event becomes one SSE frame: `event:` carries the event
//! kind, `data:` the event as JSON. Idle periods produce `keepalive` frames
//! from the stream bridge itself, so no transport-level keepalive is set.
//! The response ends when the workflow finishes.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures_util::{Stream, StreamExt};

use stagehand_types::event::ProgressEvent;

use crate::http::error::AppError;
use crate::state::AppState;

/// GET /api/v1/workflows/{task_id}/events - Subscribe to progress events.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = state
        .gateway
        .subscribe(&task_id)
        .await
        .ok_or_else(|| AppError::workflow_not_found(&task_id))?;

    tracing::debug!(task_id = %task_id, "sse subscriber attached");
    Ok(Sse::new(events.map(|event| Ok(to_sse_event(&event)))))
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    // SSE field values cannot contain line breaks.
    let name = if event.kind.contains(['\n', '\r']) {
        "message"
    } else {
        event.kind.as_str()
    };

    match Event::default().event(name).json_data(event) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(task_id = %event.task_id, error = %e, "failed to encode sse event");
            Event::default().event("error").data(e.to_string())
        }
    }
}
