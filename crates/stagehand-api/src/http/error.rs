//! Application error type mapping to HTTP status codes and envelope format.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use stagehand_types::error::{ExecutorError, GatewayError, RegistryError, StreamError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors returned synchronously by the gateway.
    Gateway(GatewayError),
    /// Unknown workflow id.
    NotFound(String),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        AppError::Gateway(e)
    }
}

/// Malformed request bodies answer with the envelope instead of axum's plain text.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status().is_server_error() {
            AppError::Internal(rejection.body_text())
        } else {
            AppError::Validation(rejection.body_text())
        }
    }
}

impl AppError {
    pub(crate) fn workflow_not_found(task_id: &str) -> Self {
        AppError::NotFound(format!("Workflow '{task_id}' not found"))
    }

    /// Status code plus machine-readable error code.
    pub(crate) fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Gateway(GatewayError::Registry(RegistryError::Capacity { .. }))
            | AppError::Gateway(GatewayError::Stream(StreamError::Capacity { .. })) => {
                (StatusCode::TOO_MANY_REQUESTS, "CAPACITY_EXCEEDED")
            }
            AppError::Gateway(GatewayError::Registry(RegistryError::Conflict(_))) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            AppError::Gateway(GatewayError::NotFound(_)) | AppError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            AppError::Gateway(GatewayError::Validation(_))
            | AppError::Gateway(GatewayError::Webhook(_))
            | AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Gateway(GatewayError::Executor(ExecutorError::Timeout(_))) => {
                (StatusCode::GATEWAY_TIMEOUT, "BACKEND_UNAVAILABLE")
            }
            AppError::Gateway(GatewayError::Executor(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Gateway(e) => e.to_string(),
            AppError::NotFound(msg) | AppError::Validation(msg) | AppError::Internal(msg) => {
                msg.clone()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = self.message();

        if status.is_server_error() {
            tracing::warn!(code, error = %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_types::error::WebhookError;

    #[test]
    fn test_capacity_maps_to_429() {
        let err: AppError = GatewayError::from(RegistryError::Capacity { active: 10, max: 10 }).into();
        assert_eq!(err.classify(), (StatusCode::TOO_MANY_REQUESTS, "CAPACITY_EXCEEDED"));

        let err: AppError = GatewayError::from(StreamError::Capacity { open: 1, max: 1 }).into();
        assert_eq!(err.classify().1, "CAPACITY_EXCEEDED");
    }

    #[test]
    fn test_missing_backend_maps_to_503() {
        let err: AppError = GatewayError::from(ExecutorError::NotRunning).into();
        assert_eq!(err.classify(), (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE"));
    }

    #[test]
    fn test_bad_webhook_url_is_validation_error() {
        let err: AppError = GatewayError::from(WebhookError::InvalidUrl {
            url: "ftp://x".to_string(),
            reason: "unsupported scheme".to_string(),
        })
        .into();
        assert_eq!(err.classify(), (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"));
        assert!(err.message().contains("ftp://x"));
    }

    #[test]
    fn test_not_found_variants() {
        assert_eq!(AppError::workflow_not_found("t-1").classify().0, StatusCode::NOT_FOUND);
        let err: AppError = GatewayError::NotFound("t-1".to_string()).into();
        assert_eq!(err.classify(), (StatusCode::NOT_FOUND, "NOT_FOUND"));
    }
}
