//! Workflow registry: admission control, lifecycle bookkeeping and bounded
//! result retention.
//!
//! All state lives behind a single `tokio::sync::RwLock`, so every operation
//! (including the transition + store + evict sequence in `complete`) is
//! atomic with respect to every other.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_types::config::RegistryConfig;
use stagehand_types::error::RegistryError;
use stagehand_types::workflow::{WorkflowRecord, WorkflowResult, WorkflowStatus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::executor::TaskHandle;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Primitive, serializable form of the registry used for persistence.
///
/// `active_workflows` holds every retained record (terminal ones included, so
/// their results keep a matching record); `completed_workflows` holds results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub active_workflows: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub completed_workflows: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub max_completed_retention: usize,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`WorkflowRegistry::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub records: usize,
    pub results: usize,
    /// Entries that failed to parse and were skipped.
    pub skipped: usize,
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub active: usize,
    pub total: usize,
    pub results: usize,
    pub max_active: usize,
    pub max_completed: usize,
}

// ---------------------------------------------------------------------------
// WorkflowRegistry
// ---------------------------------------------------------------------------

struct StoredResult {
    /// Tie-breaker for results completed within the same clock tick.
    seq: u64,
    result: WorkflowResult,
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, WorkflowRecord>,
    results: HashMap<String, StoredResult>,
    handles: HashMap<String, TaskHandle>,
    cancel_tokens: HashMap<String, CancellationToken>,
    next_seq: u64,
}

impl RegistryState {
    fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.is_active()).count()
    }

    fn store_result(&mut self, result: WorkflowResult) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.results
            .insert(result.task_id.clone(), StoredResult { seq, result });
    }

    /// Evict the oldest completion, one at a time, until within `max`.
    ///
    /// Returns the evicted task ids, oldest first.
    fn enforce_retention(&mut self, max: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.results.len() > max {
            let oldest = self
                .results
                .iter()
                .min_by_key(|(_, stored)| (stored.result.completed_at, stored.seq))
                .map(|(id, _)| id.clone());
            let Some(task_id) = oldest else {
                break;
            };
            self.results.remove(&task_id);
            self.records.remove(&task_id);
            tracing::debug!(task_id = %task_id, "evicted oldest completed workflow");
            evicted.push(task_id);
        }
        evicted
    }

    /// Apply a forward transition, stamping timestamps. Returns whether it applied.
    fn apply_transition(
        &mut self,
        task_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> bool {
        let Some(record) = self.records.get_mut(task_id) else {
            return false;
        };
        if !record.status.can_transition_to(status) {
            tracing::debug!(
                task_id = %task_id,
                from = %record.status,
                to = %status,
                "ignored non-forward status transition"
            );
            return false;
        }

        let now = Utc::now();
        if status == WorkflowStatus::Running && record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if status.is_terminal() {
            record.completed_at = Some(now);
        }
        if error.is_some() {
            record.error = error;
        }
        record.status = status;

        if status.is_terminal() {
            self.cancel_tokens.remove(task_id);
        }
        true
    }
}

/// Process-wide store of workflow records and results.
///
/// Construct once, share via `Arc`.
pub struct WorkflowRegistry {
    state: RwLock<RegistryState>,
    max_active: usize,
    max_completed: usize,
}

impl WorkflowRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self::with_limits(config.max_active, config.max_completed)
    }

    pub fn with_limits(max_active: usize, max_completed: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_active,
            max_completed,
        }
    }

    /// Admit a new `Pending` workflow.
    ///
    /// Fails with [`RegistryError::Capacity`] when `max_active` workflows are
    /// already active, and with [`RegistryError::Conflict`] on a reused id.
    /// A rejected call leaves the registry unchanged.
    pub async fn create(
        &self,
        task_id: &str,
        kind: &str,
        input: &str,
        config: serde_json::Value,
    ) -> Result<WorkflowRecord, RegistryError> {
        let mut state = self.state.write().await;

        let active = state.active_count();
        if active >= self.max_active {
            tracing::warn!(task_id = %task_id, active, max = self.max_active, "workflow admission rejected");
            return Err(RegistryError::Capacity {
                active,
                max: self.max_active,
            });
        }
        if state.records.contains_key(task_id) || state.results.contains_key(task_id) {
            return Err(RegistryError::Conflict(task_id.to_string()));
        }

        let record = WorkflowRecord::new(task_id, kind, input, config);
        state.records.insert(task_id.to_string(), record.clone());
        state
            .cancel_tokens
            .insert(task_id.to_string(), CancellationToken::new());

        tracing::info!(task_id = %task_id, kind = %kind, "workflow admitted");
        Ok(record)
    }

    /// Forward-only status change. Unknown ids and backward moves are no-ops.
    pub async fn transition(
        &self,
        task_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> bool {
        let applied = self
            .state
            .write()
            .await
            .apply_transition(task_id, status, error);
        if applied {
            tracing::info!(task_id = %task_id, status = %status, "workflow status changed");
        }
        applied
    }

    /// Record the final result of a workflow.
    ///
    /// Applies the terminal transition, stores the result (stamping its
    /// `completed_at`), drops the tracked execution handle, and evicts the
    /// oldest completions beyond `max_completed`. If the workflow was already
    /// cancelled, it stays cancelled and the stored result says so. Returns
    /// `false` for unknown ids and for a second result on the same id.
    pub async fn complete(&self, task_id: &str, result: WorkflowResult) -> bool {
        self.complete_evicting(task_id, result).await.is_some()
    }

    /// [`complete`](Self::complete), reporting which task ids were evicted to
    /// make room. `None` when the result was not recorded.
    pub async fn complete_evicting(
        &self,
        task_id: &str,
        mut result: WorkflowResult,
    ) -> Option<Vec<String>> {
        let mut state = self.state.write().await;

        let Some(current) = state.records.get(task_id).map(|r| r.status) else {
            tracing::warn!(task_id = %task_id, "complete() for unknown workflow ignored");
            return None;
        };
        if state.results.contains_key(task_id) {
            tracing::warn!(task_id = %task_id, "workflow already has a result; ignoring duplicate");
            return None;
        }

        if !result.status.is_terminal() {
            result.status = WorkflowStatus::Completed;
        }
        if current.is_terminal() {
            result.status = current;
        } else {
            let error = match result.status {
                WorkflowStatus::Failed => result.error.clone(),
                _ => None,
            };
            state.apply_transition(task_id, result.status, error);
        }

        result.task_id = task_id.to_string();
        result.completed_at = Utc::now();
        let status = result.status;
        state.store_result(result);
        state.handles.remove(task_id);
        state.cancel_tokens.remove(task_id);
        let evicted = state.enforce_retention(self.max_completed);

        tracing::info!(task_id = %task_id, status = %status, "workflow result recorded");
        Some(evicted)
    }

    /// Remember the execution handle of a submitted unit.
    ///
    /// Ignored (and the handle detached) once the workflow is terminal.
    pub async fn track(&self, task_id: &str, handle: TaskHandle) {
        let mut state = self.state.write().await;
        let active = state.records.get(task_id).is_some_and(|r| r.is_active());
        if active {
            state.handles.insert(task_id.to_string(), handle);
        }
    }

    /// Remove a still-`Pending` record whose start was rolled back.
    pub async fn discard(&self, task_id: &str) -> bool {
        let mut state = self.state.write().await;
        let pending = state
            .records
            .get(task_id)
            .is_some_and(|r| r.status == WorkflowStatus::Pending);
        if pending {
            state.records.remove(task_id);
            state.cancel_tokens.remove(task_id);
            state.handles.remove(task_id);
            tracing::debug!(task_id = %task_id, "discarded pending workflow");
        }
        pending
    }

    pub async fn get_record(&self, task_id: &str) -> Option<WorkflowRecord> {
        self.state.read().await.records.get(task_id).cloned()
    }

    pub async fn get_result(&self, task_id: &str) -> Option<WorkflowResult> {
        self.state
            .read()
            .await
            .results
            .get(task_id)
            .map(|stored| stored.result.clone())
    }

    /// Mark a running workflow cancelled and fire its cancellation token.
    ///
    /// Only `Running` workflows can be cancelled. In-flight work is not
    /// stopped; a collaborator may observe the token and return early.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut state = self.state.write().await;
        let running = state
            .records
            .get(task_id)
            .is_some_and(|r| r.status == WorkflowStatus::Running);
        if !running {
            return false;
        }

        let token = state.cancel_tokens.get(task_id).cloned();
        state.apply_transition(task_id, WorkflowStatus::Cancelled, None);
        if let Some(token) = token {
            token.cancel();
        }
        tracing::info!(task_id = %task_id, "workflow cancelled");
        true
    }

    /// Cooperative cancellation token for a non-terminal workflow.
    pub async fn cancellation_token(&self, task_id: &str) -> Option<CancellationToken> {
        self.state.read().await.cancel_tokens.get(task_id).cloned()
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            active: state.active_count(),
            total: state.records.len(),
            results: state.results.len(),
            max_active: self.max_active,
            max_completed: self.max_completed,
        }
    }

    /// Convert every record and result into plain JSON values.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        let mut active_workflows = BTreeMap::new();
        let mut completed_workflows = BTreeMap::new();

        for (task_id, record) in &state.records {
            match serde_json::to_value(record) {
                Ok(value) => {
                    active_workflows.insert(task_id.clone(), value);
                }
                Err(e) => tracing::warn!(task_id = %task_id, error = %e, "failed to snapshot record"),
            }
        }
        for (task_id, stored) in &state.results {
            match serde_json::to_value(&stored.result) {
                Ok(value) => {
                    completed_workflows.insert(task_id.clone(), value);
                }
                Err(e) => tracing::warn!(task_id = %task_id, error = %e, "failed to snapshot result"),
            }
        }

        RegistrySnapshot {
            active_workflows,
            completed_workflows,
            max_completed_retention: self.max_completed,
            timestamp: Utc::now(),
        }
    }

    /// Repopulate the registry from a snapshot.
    ///
    /// Malformed entries are logged and skipped. Results are re-ordered by
    /// their completion time and trimmed to this registry's retention limit.
    pub async fn restore(&self, snapshot: &RegistrySnapshot) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut state = self.state.write().await;

        for (task_id, value) in &snapshot.active_workflows {
            match serde_json::from_value::<WorkflowRecord>(value.clone()) {
                Ok(record) => {
                    if record.is_active() {
                        state
                            .cancel_tokens
                            .insert(task_id.clone(), CancellationToken::new());
                    }
                    state.records.insert(task_id.clone(), record);
                    report.records += 1;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "skipping malformed workflow record");
                    report.skipped += 1;
                }
            }
        }

        let mut results = Vec::new();
        for (task_id, value) in &snapshot.completed_workflows {
            match serde_json::from_value::<WorkflowResult>(value.clone()) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "skipping malformed workflow result");
                    report.skipped += 1;
                }
            }
        }
        results.sort_by_key(|r| r.completed_at);
        report.results = results.len();
        for result in results {
            state.store_result(result);
        }
        state.enforce_retention(self.max_completed);

        tracing::info!(
            records = report.records,
            results = report.results,
            skipped = report.skipped,
            "registry restored from snapshot"
        );
        report
    }

    /// Fail every non-terminal record (typically right after a restore).
    ///
    /// The work those records described did not survive the previous process.
    pub async fn reap_interrupted(&self, reason: &str) -> usize {
        let mut state = self.state.write().await;
        let interrupted: Vec<(String, String)> = state
            .records
            .values()
            .filter(|r| r.is_active())
            .map(|r| (r.task_id.clone(), r.kind.clone()))
            .collect();

        for (task_id, kind) in &interrupted {
            state.apply_transition(task_id, WorkflowStatus::Failed, Some(reason.to_string()));
            state.handles.remove(task_id);
            if !state.results.contains_key(task_id) {
                state.store_result(WorkflowResult::failed(task_id.clone(), kind.clone(), reason));
            }
            tracing::warn!(task_id = %task_id, "marked interrupted workflow as failed");
        }
        state.enforce_retention(self.max_completed);
        interrupted.len()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("max_active", &self.max_active)
            .field("max_completed", &self.max_completed)
            .finish_non_exhaustive()
    }
}
