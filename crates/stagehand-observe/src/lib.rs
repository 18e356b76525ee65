//! Observability setup for Stagehand: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
