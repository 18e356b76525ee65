//! HTTP/REST API layer for Stagehand.
//!
//! Axum-based REST API at `/api/v1/` with envelope responses, an SSE
//! progress stream per workflow, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
