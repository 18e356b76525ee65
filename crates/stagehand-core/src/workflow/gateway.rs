//! Orchestration gateway: the single entry point used by the REST layer.
//!
//! `start()` performs admission synchronously (registry capacity, stream
//! capacity, webhook URL, executor availability) and rolls back everything it
//! already acquired when a later step fails. The workflow itself then runs as
//! one unit on the dedicated executor:
//!
//! 1. transition to `Running`, emit `workflow_started`
//! 2. run the orchestrator with a fan-out progress callback
//!    (stream first, then the webhook queue, per event, in emission order)
//! 3. record the result (errors and panics become `Failed`)
//! 4. emit the terminal lifecycle event, close the stream, drain the webhook
//!    queue, then drop the webhook
//!
//! Webhook deliveries (with their retries) run on a per-task drainer task, so
//! a slow or dead endpoint never holds up the orchestrator.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use stagehand_types::error::{ExecutorError, GatewayError};
use stagehand_types::event::{ProgressEvent, kinds};
use stagehand_types::webhook::DeliveryStats;
use stagehand_types::workflow::{WorkflowResult, WorkflowStatus, new_task_id};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::executor::TaskExecutor;
use super::notifier::EventNotifier;
use super::orchestrator::{BoxOrchestrator, ExecutionContext, OrchestrationOutput, ProgressCallback};
use super::registry::{RegistryStats, WorkflowRegistry};
use crate::event::{EventStreamBridge, ProgressStream, PushOutcome};

/// Path prefix under which the REST layer exposes workflows.
pub const WORKFLOWS_PATH: &str = "/api/v1/workflows";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request to start a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Workflow pattern name understood by the orchestrator.
    pub kind: String,
    /// Task description.
    pub input: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Destination for progress webhooks, registered before the workflow runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub task_id: String,
    pub status: WorkflowStatus,
    pub stream_url: String,
}

/// Status poll answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub task_id: String,
    pub kind: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthView {
    pub executor_running: bool,
    pub orchestrator: String,
    pub registry: RegistryStats,
    pub open_streams: usize,
}

// ---------------------------------------------------------------------------
// OrchestrationGateway
// ---------------------------------------------------------------------------

/// Façade over executor, registry, stream bridge and webhook notifier.
pub struct OrchestrationGateway<N: EventNotifier> {
    executor: Arc<TaskExecutor>,
    registry: Arc<WorkflowRegistry>,
    streams: EventStreamBridge,
    notifier: Arc<N>,
    orchestrator: BoxOrchestrator,
    keepalive: Duration,
}

impl<N: EventNotifier> OrchestrationGateway<N> {
    pub fn new(
        executor: Arc<TaskExecutor>,
        registry: Arc<WorkflowRegistry>,
        streams: EventStreamBridge,
        notifier: Arc<N>,
        orchestrator: BoxOrchestrator,
        keepalive: Duration,
    ) -> Self {
        Self {
            executor,
            registry,
            streams,
            notifier,
            orchestrator,
            keepalive,
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn streams(&self) -> &EventStreamBridge {
        &self.streams
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Admit and launch a workflow. Returns as soon as it is scheduled.
    pub async fn start(&self, request: StartRequest) -> Result<StartResponse, GatewayError> {
        let kind = request.kind.trim();
        if kind.is_empty() {
            return Err(GatewayError::Validation("kind must not be empty".to_string()));
        }
        if !self.orchestrator.supports(kind) {
            return Err(GatewayError::Validation(format!(
                "unsupported workflow kind '{kind}' for orchestrator '{}'",
                self.orchestrator.name()
            )));
        }
        if !self.executor.is_running() {
            return Err(ExecutorError::NotRunning.into());
        }

        let task_id = new_task_id();
        self.registry
            .create(&task_id, kind, &request.input, request.config.clone())
            .await?;

        if let Err(e) = self.streams.open(&task_id) {
            self.registry.discard(&task_id).await;
            return Err(e.into());
        }

        if let Some(url) = request.webhook_url.as_deref() {
            if let Err(e) = self.notifier.register(&task_id, url) {
                self.rollback(&task_id).await;
                return Err(e.into());
            }
        }

        let cancellation = self
            .registry
            .cancellation_token(&task_id)
            .await
            .unwrap_or_else(CancellationToken::new);
        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{kind} workflow"));

        let job = WorkflowJob {
            ctx: ExecutionContext {
                task_id: task_id.clone(),
                kind: kind.to_string(),
                input: request.input,
                title,
                config: request.config,
                cancellation,
            },
            registry: Arc::clone(&self.registry),
            streams: self.streams.clone(),
            notifier: Arc::clone(&self.notifier),
            orchestrator: self.orchestrator.clone(),
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let handle = match self.executor.submit(job.run(ack_tx)) {
            Ok(handle) => handle,
            Err(e) => {
                self.rollback(&task_id).await;
                return Err(e.into());
            }
        };
        self.registry.track(&task_id, handle).await;

        let status = match tokio::time::timeout(self.executor.ack_timeout(), ack_rx).await {
            Ok(Ok(())) => WorkflowStatus::Running,
            _ => {
                tracing::warn!(
                    task_id = %task_id,
                    timeout = ?self.executor.ack_timeout(),
                    "workflow did not acknowledge start in time"
                );
                self.registry
                    .get_record(&task_id)
                    .await
                    .map(|r| r.status)
                    .unwrap_or(WorkflowStatus::Pending)
            }
        };

        tracing::info!(task_id = %task_id, kind = %kind, status = %status, "workflow started");
        Ok(StartResponse {
            stream_url: format!("{WORKFLOWS_PATH}/{task_id}/events"),
            task_id,
            status,
        })
    }

    async fn rollback(&self, task_id: &str) {
        self.notifier.unregister(task_id);
        self.streams.close(task_id);
        self.registry.discard(task_id).await;
        tracing::debug!(task_id = %task_id, "rolled back workflow start");
    }

    pub async fn status(&self, task_id: &str) -> Option<StatusView> {
        let record = self.registry.get_record(task_id).await?;
        let result_summary = self
            .registry
            .get_result(task_id)
            .await
            .map(|r| r.summary());
        Some(StatusView {
            task_id: record.task_id,
            kind: record.kind,
            status: record.status,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            result_summary,
            error: record.error,
        })
    }

    /// Cancel a running workflow (bookkeeping plus a cooperative token).
    pub async fn cancel(&self, task_id: &str) -> bool {
        self.registry.cancel(task_id).await
    }

    pub async fn result(&self, task_id: &str) -> Option<WorkflowResult> {
        self.registry.get_result(task_id).await
    }

    /// Event stream for a known workflow; `None` if the id is unknown.
    ///
    /// The stream ends immediately when the workflow already finished or
    /// another subscriber is attached.
    pub async fn subscribe(&self, task_id: &str) -> Option<ProgressStream> {
        self.registry.get_record(task_id).await?;
        Some(self.streams.consume(task_id, self.keepalive))
    }

    /// Register (or replace) the webhook of an active workflow.
    pub async fn register_webhook(&self, task_id: &str, url: &str) -> Result<(), GatewayError> {
        match self.registry.get_record(task_id).await {
            Some(record) if record.is_active() => {
                self.notifier.register(task_id, url)?;
                Ok(())
            }
            Some(record) => Err(GatewayError::Validation(format!(
                "workflow '{task_id}' is already {}",
                record.status
            ))),
            None => Err(GatewayError::NotFound(task_id.to_string())),
        }
    }

    pub fn unregister_webhook(&self, task_id: &str) -> bool {
        self.notifier.unregister(task_id)
    }

    pub fn webhook_stats(&self, task_id: &str) -> DeliveryStats {
        self.notifier.stats(task_id)
    }

    pub async fn health(&self) -> HealthView {
        HealthView {
            executor_running: self.executor.is_running(),
            orchestrator: self.orchestrator.name().to_string(),
            registry: self.registry.stats().await,
            open_streams: self.streams.open_count(),
        }
    }
}

impl<N: EventNotifier> std::fmt::Debug for OrchestrationGateway<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationGateway")
            .field("orchestrator", &self.orchestrator.name())
            .field("keepalive", &self.keepalive)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// WorkflowJob
// ---------------------------------------------------------------------------

/// One workflow's unit of work on the executor.
struct WorkflowJob<N: EventNotifier> {
    ctx: ExecutionContext,
    registry: Arc<WorkflowRegistry>,
    streams: EventStreamBridge,
    notifier: Arc<N>,
    orchestrator: BoxOrchestrator,
}

/// Item on a task's webhook queue.
enum Outbound {
    Event(ProgressEvent),
    /// No more events follow; the drainer exits after what is queued.
    Finish,
}

/// Deliver one task's queued webhook events in order, one at a time.
fn spawn_webhook_drainer<N: EventNotifier>(
    notifier: Arc<N>,
    task_id: String,
    mut queued: mpsc::UnboundedReceiver<Outbound>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Outbound::Event(event)) = queued.recv().await {
            notifier.notify(&task_id, &event).await;
        }
    })
}

/// Closes the task's stream however the job ends.
struct StreamCloser {
    streams: EventStreamBridge,
    task_id: String,
}

impl Drop for StreamCloser {
    fn drop(&mut self) {
        self.streams.close(&self.task_id);
    }
}

impl<N: EventNotifier> WorkflowJob<N> {
    async fn run(self, ack: oneshot::Sender<()>) {
        let task_id = self.ctx.task_id.clone();
        let _closer = StreamCloser {
            streams: self.streams.clone(),
            task_id: task_id.clone(),
        };
        let (outbound, queued) = mpsc::unbounded_channel();
        let drainer = spawn_webhook_drainer(Arc::clone(&self.notifier), task_id.clone(), queued);
        let on_event = self.progress_callback(outbound.clone());
        let started = Instant::now();

        self.registry
            .transition(&task_id, WorkflowStatus::Running, None)
            .await;
        let _ = ack.send(());
        on_event
            .emit(
                kinds::WORKFLOW_STARTED,
                serde_json::json!({ "kind": self.ctx.kind, "title": self.ctx.title }),
            )
            .await;

        let outcome = AssertUnwindSafe(self.orchestrator.execute(self.ctx.clone(), on_event.clone()))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut result = match outcome {
            Ok(Ok(output)) => self.build_result(output),
            Ok(Err(e)) => WorkflowResult::failed(&task_id, &self.ctx.title, e.to_string()),
            Err(panic) => WorkflowResult::failed(
                &task_id,
                &self.ctx.title,
                format!("orchestrator panicked: {}", panic_message(&*panic)),
            ),
        };
        result.execution_time_secs = elapsed;

        if let Some(error) = &result.error {
            tracing::error!(task_id = %task_id, error = %error, "workflow failed");
        }

        let proposed = result.status;
        let summary = result.summary();
        let evicted = self
            .registry
            .complete_evicting(&task_id, result)
            .await
            .unwrap_or_default();
        for evicted_id in &evicted {
            self.notifier.forget(evicted_id);
        }
        let status = self
            .registry
            .get_record(&task_id)
            .await
            .map(|r| r.status)
            .unwrap_or(proposed);

        let terminal_kind = match status {
            WorkflowStatus::Failed => kinds::WORKFLOW_FAILED,
            WorkflowStatus::Cancelled => kinds::WORKFLOW_CANCELLED,
            _ => kinds::WORKFLOW_COMPLETED,
        };
        on_event
            .emit(
                terminal_kind,
                serde_json::json!({
                    "status": status,
                    "summary": summary,
                    "execution_time_secs": elapsed,
                }),
            )
            .await;

        self.streams.close(&task_id);
        let _ = outbound.send(Outbound::Finish);
        if drainer.await.is_err() {
            tracing::warn!(task_id = %task_id, "webhook drainer ended abnormally");
        }
        self.notifier.unregister(&task_id);
        tracing::info!(task_id = %task_id, status = %status, elapsed_secs = elapsed, "workflow finished");
    }

    fn build_result(&self, output: OrchestrationOutput) -> WorkflowResult {
        let status = if output.error.is_some() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        WorkflowResult {
            task_id: self.ctx.task_id.clone(),
            title: output.title.unwrap_or_else(|| self.ctx.title.clone()),
            status,
            contributions: output.contributions,
            syntheses: output.syntheses,
            final_synthesis: output.final_synthesis,
            execution_time_secs: 0.0,
            total_cost: output.total_cost,
            artifacts: output.artifacts,
            error: output.error,
            completed_at: Utc::now(),
        }
    }

    /// Fan each event out to the stream, then to the webhook queue if a
    /// webhook is registered. Never waits on delivery.
    fn progress_callback(&self, outbound: mpsc::UnboundedSender<Outbound>) -> ProgressCallback {
        let task_id = self.ctx.task_id.clone();
        let streams = self.streams.clone();
        let notifier = Arc::clone(&self.notifier);

        ProgressCallback::new(task_id.clone(), move |event: ProgressEvent| {
            match streams.push(&task_id, event.clone(), false) {
                Ok(PushOutcome::Delivered) => {}
                Ok(outcome) => {
                    tracing::debug!(task_id = %task_id, kind = %event.kind, ?outcome, "event not queued");
                }
                Err(e) => tracing::warn!(task_id = %task_id, error = %e, "event push failed"),
            }
            if notifier.is_registered(&task_id) && outbound.send(Outbound::Event(event)).is_err() {
                tracing::debug!(task_id = %task_id, "webhook queue closed; event dropped");
            }
            std::future::ready(())
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
