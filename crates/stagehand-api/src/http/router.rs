//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Lifecycle
        .route("/workflows", post(handlers::workflow::start_workflow))
        .route("/workflows/{task_id}", get(handlers::workflow::get_status))
        .route(
            "/workflows/{task_id}/cancel",
            post(handlers::workflow::cancel_workflow),
        )
        .route(
            "/workflows/{task_id}/result",
            get(handlers::workflow::get_result),
        )
        // Progress stream
        .route(
            "/workflows/{task_id}/events",
            get(handlers::stream::stream_events),
        )
        // Webhooks
        .route(
            "/workflows/{task_id}/webhook",
            put(handlers::webhook::register_webhook).delete(handlers::webhook::unregister_webhook),
        )
        .route(
            "/workflows/{task_id}/webhook/stats",
            get(handlers::webhook::get_webhook_stats),
        )
        .route("/health", get(handlers::health::get_health));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
