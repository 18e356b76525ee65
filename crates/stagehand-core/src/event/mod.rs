//! Per-task progress event streaming.

pub mod bridge;

pub use bridge::{EventStreamBridge, ProgressStream, PushOutcome};
