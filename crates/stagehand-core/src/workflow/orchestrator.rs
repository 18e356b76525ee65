//! Orchestrator collaborator seam.
//!
//! The gateway does not know how a workflow is actually carried out (which
//! agents run, how many synthesis rounds). It hands an [`ExecutionContext`]
//! and a [`ProgressCallback`] to an [`Orchestrator`] and records whatever
//! comes back.
//!
//! Dynamic dispatch follows the usual blanket-impl pattern:
//! 1. `Orchestrator` uses RPITIT async methods (not object-safe)
//! 2. `OrchestratorDyn` is the object-safe mirror with boxed futures
//! 3. `BoxOrchestrator` wraps `Arc<dyn OrchestratorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stagehand_types::error::OrchestratorError;
use stagehand_types::event::ProgressEvent;
use stagehand_types::workflow::{AgentContribution, ArtifactRef, SynthesisEntry};
use tokio_util::sync::CancellationToken;

/// Everything an orchestrator needs to run one workflow.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: String,
    pub kind: String,
    pub input: String,
    pub title: String,
    pub config: serde_json::Value,
    /// Fired when the workflow is cancelled. Honouring it is optional.
    pub cancellation: CancellationToken,
}

/// What an orchestrator produced. The gateway turns it into a `WorkflowResult`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationOutput {
    /// Overrides the title from the start request when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub contributions: Vec<AgentContribution>,
    #[serde(default)]
    pub syntheses: Vec<SynthesisEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_synthesis: Option<String>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// A soft failure: the run finished but should be recorded as failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// ProgressCallback
// ---------------------------------------------------------------------------

type CallbackFn = dyn Fn(ProgressEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Async sink for progress events, bound to one task.
///
/// Awaiting `emit`/`send` means the event has been pushed to the stream and
/// offered to the webhook, in that order.
#[derive(Clone)]
pub struct ProgressCallback {
    task_id: String,
    inner: Arc<CallbackFn>,
}

impl ProgressCallback {
    pub fn new<F, Fut>(task_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(ProgressEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            task_id: task_id.into(),
            inner: Arc::new(move |event| Box::pin(f(event))),
        }
    }

    /// A callback that discards every event.
    pub fn noop(task_id: impl Into<String>) -> Self {
        Self::new(task_id, |_| async {})
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Build an event for this task and deliver it.
    pub async fn emit(&self, kind: &str, payload: serde_json::Value) {
        self.send(ProgressEvent::new(kind, self.task_id.clone(), payload))
            .await;
    }

    pub async fn send(&self, event: ProgressEvent) {
        (self.inner)(event).await;
    }
}

impl std::fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCallback")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator trait
// ---------------------------------------------------------------------------

/// Carries out a workflow, reporting progress through `on_event`.
pub trait Orchestrator: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Whether this orchestrator can run workflows of `kind`.
    fn supports(&self, _kind: &str) -> bool {
        true
    }

    fn execute(
        &self,
        ctx: ExecutionContext,
        on_event: ProgressCallback,
    ) -> impl Future<Output = Result<OrchestrationOutput, OrchestratorError>> + Send;
}

/// Object-safe version of [`Orchestrator`] with boxed futures.
pub trait OrchestratorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: &str) -> bool;

    fn execute_boxed(
        &self,
        ctx: ExecutionContext,
        on_event: ProgressCallback,
    ) -> Pin<Box<dyn Future<Output = Result<OrchestrationOutput, OrchestratorError>> + Send + '_>>;
}

impl<T: Orchestrator> OrchestratorDyn for T {
    fn name(&self) -> &str {
        Orchestrator::name(self)
    }

    fn supports(&self, kind: &str) -> bool {
        Orchestrator::supports(self, kind)
    }

    fn execute_boxed(
        &self,
        ctx: ExecutionContext,
        on_event: ProgressCallback,
    ) -> Pin<Box<dyn Future<Output = Result<OrchestrationOutput, OrchestratorError>> + Send + '_>>
    {
        Box::pin(self.execute(ctx, on_event))
    }
}

/// Type-erased, cheaply cloneable orchestrator.
#[derive(Clone)]
pub struct BoxOrchestrator {
    inner: Arc<dyn OrchestratorDyn>,
}

impl BoxOrchestrator {
    pub fn new<T: Orchestrator>(orchestrator: T) -> Self {
        Self {
            inner: Arc::new(orchestrator),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.inner.supports(kind)
    }

    pub async fn execute(
        &self,
        ctx: ExecutionContext,
        on_event: ProgressCallback,
    ) -> Result<OrchestrationOutput, OrchestratorError> {
        self.inner.execute_boxed(ctx, on_event).await
    }
}

impl std::fmt::Debug for BoxOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxOrchestrator")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Echo;

    impl Orchestrator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn supports(&self, kind: &str) -> bool {
            kind != "forbidden"
        }

        async fn execute(
            &self,
            ctx: ExecutionContext,
            on_event: ProgressCallback,
        ) -> Result<OrchestrationOutput, OrchestratorError> {
            on_event.emit("echoed", serde_json::json!({"input": ctx.input})).await;
            Ok(OrchestrationOutput {
                final_synthesis: Some(ctx.input),
                ..Default::default()
            })
        }
    }

    fn context(input: &str) -> ExecutionContext {
        ExecutionContext {
            task_id: "t-1".to_string(),
            kind: "debate".to_string(),
            input: input.to_string(),
            title: "title".to_string(),
            config: serde_json::json!({}),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn box_orchestrator_delegates() {
        let boxed = BoxOrchestrator::new(Echo);
        assert_eq!(boxed.name(), "echo");
        assert!(boxed.supports("debate"));
        assert!(!boxed.supports("forbidden"));

        let out = boxed
            .execute(context("hello"), ProgressCallback::noop("t-1"))
            .await
            .unwrap();
        assert_eq!(out.final_synthesis.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn callback_receives_events_for_its_task() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = ProgressCallback::new("t-1", move |event: ProgressEvent| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(event);
            }
        });

        BoxOrchestrator::new(Echo)
            .execute(context("hi"), callback.clone())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, "echoed");
        assert_eq!(seen[0].task_id, "t-1");
        assert_eq!(seen[0].payload["input"], "hi");
        assert_eq!(callback.task_id(), "t-1");
    }
}
