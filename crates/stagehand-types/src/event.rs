//! Progress events flowing from the orchestrator to stream subscribers and
//! webhooks.
//!
//! The orchestrator owns the `kind` vocabulary and the payload shape; the core
//! only adds a few lifecycle kinds of its own (see [`kinds`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kinds emitted by the core itself.
pub mod kinds {
    /// Synthetic event produced when no real event arrived within the read timeout.
    pub const KEEPALIVE: &str = "keepalive";
    /// The workflow entered `Running`.
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    pub const WORKFLOW_FAILED: &str = "workflow_failed";
    pub const WORKFLOW_CANCELLED: &str = "workflow_cancelled";
}

/// A single progress notification for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event kind (e.g. `agent_started`, `synthesis_ready`, `keepalive`).
    pub kind: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    /// Opaque orchestrator payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(kind: impl Into<String>, task_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            task_id: task_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Synthetic keepalive event carrying no payload.
    pub fn keepalive(task_id: impl Into<String>) -> Self {
        Self::new(kinds::KEEPALIVE, task_id, serde_json::Value::Null)
    }

    pub fn is_keepalive(&self) -> bool {
        self.kind == kinds::KEEPALIVE
    }
}
