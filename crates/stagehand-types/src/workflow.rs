//! Workflow lifecycle types for Stagehand.
//!
//! `WorkflowRecord` is the registry's bookkeeping entry for a submitted job;
//! `WorkflowResult` is the immutable outcome produced once the orchestrator
//! returns (or fails). Both serialize to plain JSON so they can be persisted in
//! a registry snapshot and served over the REST API unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Task identifiers
// ---------------------------------------------------------------------------

/// Generate a new process-unique task id.
///
/// UUIDv7 is time-sortable, so ids handed out later compare greater, which
/// keeps listings and log output in submission order.
pub fn new_task_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow.
///
/// Transitions are strictly forward: `Pending -> Running -> terminal`, where
/// terminal is one of `Completed`, `Failed` or `Cancelled`. Skipping `Running`
/// is allowed (a workflow may fail before it starts); leaving a terminal state
/// is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status ends the workflow's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Position in the forward-only lifecycle. All terminal states share a rank.
    fn rank(self) -> u8 {
        match self {
            WorkflowStatus::Pending => 0,
            WorkflowStatus::Running => 1,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRecord
// ---------------------------------------------------------------------------

/// Bookkeeping entry for one submitted workflow.
///
/// Owned by the workflow registry and mutated only through its transition
/// operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Process-unique task id.
    pub task_id: String,
    /// Workflow pattern name (e.g. "debate", "research").
    pub kind: String,
    /// Free-form description of the task input.
    pub input: String,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// When the record was admitted.
    pub created_at: DateTime<Utc>,
    /// First entry into `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Entry into a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Configuration the workflow was started with.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Error message for failed workflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRecord {
    /// Build a fresh `Pending` record.
    pub fn new(
        task_id: impl Into<String>,
        kind: impl Into<String>,
        input: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.into(),
            input: input.into(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            config,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// WorkflowResult
// ---------------------------------------------------------------------------

/// A single agent's contribution to a workflow result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContribution {
    /// Agent name.
    pub agent: String,
    /// Role the agent played (e.g. "critic", "researcher").
    #[serde(default)]
    pub role: String,
    /// Produced content.
    pub content: String,
    /// Orchestrator-specific extras (model, tokens, round, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// One synthesis pass over the agent contributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisEntry {
    /// Round (1-based) in which the synthesis was produced.
    pub round: u32,
    pub content: String,
}

/// Reference to an artifact generated during the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    /// Location of the artifact (file path or URL).
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Final outcome of a workflow.
///
/// Immutable once stored, except `completed_at`, which the registry stamps
/// when the result is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub task_id: String,
    pub title: String,
    /// Terminal status of the workflow.
    pub status: WorkflowStatus,
    /// Agent contributions in the order they were produced.
    #[serde(default)]
    pub contributions: Vec<AgentContribution>,
    /// Synthesis passes in the order they were produced.
    #[serde(default)]
    pub syntheses: Vec<SynthesisEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_synthesis: Option<String>,
    /// Wall-clock execution time in seconds.
    #[serde(default)]
    pub execution_time_secs: f64,
    /// Aggregate cost in USD.
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowResult {
    /// Build a failed result carrying only the error message.
    pub fn failed(task_id: impl Into<String>, title: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            status: WorkflowStatus::Failed,
            contributions: Vec::new(),
            syntheses: Vec::new(),
            final_synthesis: None,
            execution_time_secs: 0.0,
            total_cost: 0.0,
            artifacts: Vec::new(),
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    /// Short human-readable summary used by status polls.
    pub fn summary(&self) -> String {
        match (&self.final_synthesis, &self.error) {
            (_, Some(err)) => format!("{}: {err}", self.status),
            (Some(text), None) => truncate(text, 200),
            (None, None) => format!(
                "{} with {} contribution(s)",
                self.status,
                self.contributions.len()
            ),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&WorkflowStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let parsed: WorkflowStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(parsed, WorkflowStatus::Running);
    }

    #[test]
    fn test_status_display_and_from_str() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            let parsed: WorkflowStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_forward_transitions() {
        use WorkflowStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = WorkflowRecord::new("t-1", "debate", "topic", serde_json::json!({"rounds": 2}));
        assert_eq!(record.status, WorkflowStatus::Pending);
        assert!(record.is_active());
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_record_omits_empty_optionals() {
        let record = WorkflowRecord::new("t-1", "debate", "topic", serde_json::Value::Null);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("started_at").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_task_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| new_task_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_result_summary_prefers_error() {
        let result = WorkflowResult::failed("t-1", "Title", "boom");
        assert_eq!(result.summary(), "failed: boom");
    }

    #[test]
    fn test_result_summary_truncates_long_synthesis() {
        let mut result = WorkflowResult::failed("t-1", "Title", "x");
        result.error = None;
        result.status = WorkflowStatus::Completed;
        result.final_synthesis = Some("a".repeat(500));
        let summary = result.summary();
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 203);
    }
}
