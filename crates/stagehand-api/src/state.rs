//! Application state wiring the workflow backbone together.
//!
//! AppState holds the single instances of executor, registry, stream bridge
//! and webhook dispatcher, pinned behind one concrete gateway type, and is
//! shared by the CLI commands and the REST handlers.

use std::path::PathBuf;
use std::sync::Arc;

use stagehand_core::event::EventStreamBridge;
use stagehand_core::workflow::{BoxOrchestrator, OrchestrationGateway, TaskExecutor, WorkflowRegistry};
use stagehand_infra::config::load_global_config;
use stagehand_infra::filesystem::{ensure_data_dir, resolve_data_dir, snapshot_path};
use stagehand_infra::orchestrator::PassthroughOrchestrator;
use stagehand_infra::snapshot::SnapshotStore;
use stagehand_infra::webhook::WebhookDispatcher;
use stagehand_types::config::GlobalConfig;

/// Gateway generic pinned to the HTTP webhook dispatcher.
pub type ConcreteGateway = OrchestrationGateway<WebhookDispatcher>;

/// Reason recorded on workflows that were still running when the previous
/// server process exited.
const INTERRUPTED_REASON: &str = "interrupted by server restart";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ConcreteGateway>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and wire the services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        ensure_data_dir(&data_dir).await?;
        let config = load_global_config(&data_dir).await;
        Self::build(config, data_dir)
    }

    /// Wire the services from an already-loaded configuration.
    ///
    /// The executor is constructed but not started; `serve` starts it.
    pub fn build(config: GlobalConfig, data_dir: PathBuf) -> anyhow::Result<Self> {
        let executor = Arc::new(TaskExecutor::new(&config.executor));
        let registry = Arc::new(WorkflowRegistry::new(&config.registry));
        let streams = EventStreamBridge::new(&config.streams);
        let dispatcher = Arc::new(WebhookDispatcher::new(&config.webhooks)?);
        let orchestrator = BoxOrchestrator::new(PassthroughOrchestrator::new());

        let gateway = OrchestrationGateway::new(
            executor,
            registry,
            streams,
            dispatcher,
            orchestrator,
            config.streams.keepalive(),
        );

        Ok(Self {
            gateway: Arc::new(gateway),
            config: Arc::new(config),
            data_dir,
        })
    }

    /// Snapshot file location, or `None` when persistence is disabled.
    pub fn snapshot_store(&self) -> Option<SnapshotStore> {
        self.config
            .snapshot
            .enabled
            .then(|| SnapshotStore::new(snapshot_path(&self.data_dir, &self.config.snapshot.file_name)))
    }

    /// Restore the registry from the snapshot file, then fail whatever was
    /// still in flight when it was written.
    ///
    /// Returns the number of restored records.
    pub async fn restore_snapshot(&self) -> usize {
        let Some(store) = self.snapshot_store() else {
            return 0;
        };
        let Some(snapshot) = store.load().await else {
            return 0;
        };

        let registry = self.gateway.registry();
        let report = registry.restore(&snapshot).await;
        let reaped = registry.reap_interrupted(INTERRUPTED_REASON).await;
        tracing::info!(
            records = report.records,
            results = report.results,
            skipped = report.skipped,
            reaped,
            "restored workflow snapshot"
        );
        report.records
    }

    /// Persist the registry; a no-op when persistence is disabled.
    pub async fn save_snapshot(&self) -> anyhow::Result<()> {
        if let Some(store) = self.snapshot_store() {
            let snapshot = self.gateway.registry().snapshot().await;
            store.save(&snapshot).await?;
        }
        Ok(())
    }
}
