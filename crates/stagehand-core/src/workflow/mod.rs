//! Workflow backbone: dedicated executor, registry, orchestrator seam and the
//! gateway that ties them together.
//!
//! - `executor` -- single scheduler thread whose lifetime is independent of requests
//! - `registry` -- admission control, forward-only lifecycle, bounded retention, snapshots
//! - `orchestrator` -- collaborator trait and progress callback
//! - `notifier` -- outbound webhook seam implemented in `stagehand-infra`
//! - `gateway` -- start/status/cancel/result/subscribe façade

pub mod executor;
pub mod gateway;
pub mod notifier;
pub mod orchestrator;
pub mod registry;

pub use executor::{TaskExecutor, TaskHandle};
pub use gateway::{HealthView, OrchestrationGateway, StartRequest, StartResponse, StatusView};
pub use notifier::{EventNotifier, NoopNotifier};
pub use orchestrator::{
    BoxOrchestrator, ExecutionContext, OrchestrationOutput, Orchestrator, ProgressCallback,
};
pub use registry::{RegistrySnapshot, RegistryStats, RestoreReport, WorkflowRegistry};
