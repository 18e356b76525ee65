//! Full pipeline: gateway + passthrough orchestrator + real webhook dispatcher.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use stagehand_core::event::EventStreamBridge;
use stagehand_core::workflow::{
    BoxOrchestrator, OrchestrationGateway, StartRequest, TaskExecutor, WorkflowRegistry,
};
use stagehand_infra::orchestrator::PassthroughOrchestrator;
use stagehand_infra::snapshot::SnapshotStore;
use stagehand_infra::webhook::WebhookDispatcher;
use stagehand_infra::webhook::signing::{self, SIGNATURE_HEADER};
use stagehand_types::config::{ExecutorConfig, WebhookSettings};
use stagehand_types::event::kinds;
use stagehand_types::webhook::{DeliveryStats, WebhookPayload};
use stagehand_types::workflow::WorkflowStatus;
use tempfile::TempDir;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

const SIGNING_KEY: &str = "e2e-secret";

fn gateway(max_retries: u32) -> OrchestrationGateway<WebhookDispatcher> {
    gateway_with_backoff(max_retries, 1)
}

fn gateway_with_backoff(max_retries: u32, base_delay_ms: u64) -> OrchestrationGateway<WebhookDispatcher> {
    let executor = TaskExecutor::new(&ExecutorConfig {
        startup_timeout_secs: 5,
        shutdown_timeout_secs: 1,
        ack_timeout_secs: 1,
    });
    executor.start().unwrap();

    let dispatcher = WebhookDispatcher::new(&WebhookSettings {
        max_retries,
        base_delay_ms,
        timeout_secs: 5,
        signing_key: Some(SIGNING_KEY.to_string()),
    })
    .unwrap();

    OrchestrationGateway::new(
        Arc::new(executor),
        Arc::new(WorkflowRegistry::with_limits(4, 16)),
        EventStreamBridge::with_limits(8, 64, Duration::from_secs(60)),
        Arc::new(dispatcher),
        BoxOrchestrator::new(PassthroughOrchestrator::new()),
        Duration::from_millis(100),
    )
}

fn request(webhook_url: Option<String>) -> StartRequest {
    StartRequest {
        kind: "review".to_string(),
        input: "should we migrate?".to_string(),
        config: serde_json::json!({ "agents": ["analyst", "critic"], "step_delay_ms": 20 }),
        title: Some("Migration review".to_string()),
        webhook_url,
    }
}

async fn wait_for_result(gw: &OrchestrationGateway<WebhookDispatcher>, task_id: &str) {
    for _ in 0..300 {
        if gw.result(task_id).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow {task_id} produced no result");
}

async fn wait_for_deliveries(gw: &OrchestrationGateway<WebhookDispatcher>, task_id: &str, count: u64) {
    for _ in 0..300 {
        let stats = gw.webhook_stats(task_id);
        if stats.success + stats.failure >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("webhooks for {task_id} were not delivered");
}

#[tokio::test]
async fn workflow_streams_events_and_signs_webhooks() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hooks"))
        .and(matchers::header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let gw = gateway(2);
    let started = gw
        .start(request(Some(format!("{}/hooks", mock_server.uri()))))
        .await
        .unwrap();
    assert_eq!(started.status, WorkflowStatus::Running);

    let stream = gw.subscribe(&started.task_id).await.unwrap();
    let kinds: Vec<String> = stream
        .filter(|e| std::future::ready(!e.is_keepalive()))
        .map(|e| e.kind)
        .collect()
        .await;

    assert_eq!(kinds.first().map(String::as_str), Some(kinds::WORKFLOW_STARTED));
    assert_eq!(kinds.last().map(String::as_str), Some(kinds::WORKFLOW_COMPLETED));
    assert_eq!(kinds.iter().filter(|k| *k == "agent_completed").count(), 2);

    wait_for_result(&gw, &started.task_id).await;
    let result = gw.result(&started.task_id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.title, "Migration review");
    assert_eq!(result.contributions.len(), 2);
    assert!(result.execution_time_secs > 0.0);
    wait_for_deliveries(&gw, &started.task_id, kinds.len() as u64).await;

    // Every webhook arrived signed, in emission order, each counted once.
    let requests = mock_server.received_requests().await.unwrap();
    let delivered: Vec<String> = requests
        .iter()
        .map(|r| {
            let signature = r.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
            assert!(signing::verify_bytes(SIGNING_KEY.as_bytes(), &r.body, signature));
            let payload: WebhookPayload = serde_json::from_slice(&r.body).unwrap();
            assert_eq!(payload.task_id, started.task_id);
            payload.event.kind
        })
        .collect();
    assert_eq!(delivered, kinds);

    let stats = gw.webhook_stats(&started.task_id);
    assert_eq!(stats.success as usize, kinds.len());
    assert_eq!(stats.failure, 0);
}

#[tokio::test]
async fn failing_webhook_never_affects_workflow_status() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let gw = gateway(1);
    let started = gw.start(request(Some(mock_server.uri()))).await.unwrap();
    wait_for_result(&gw, &started.task_id).await;

    let status = gw.status(&started.task_id).await.unwrap();
    assert_eq!(status.status, WorkflowStatus::Completed);
    wait_for_deliveries(&gw, &started.task_id, 1).await;

    let stats = gw.webhook_stats(&started.task_id);
    assert_eq!(stats.success, 0);
    assert!(stats.failure >= 1);
    assert_ne!(stats, DeliveryStats::default());
}

#[tokio::test]
async fn webhook_backoff_does_not_delay_workflow() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    // Each failing delivery spends 1s + 2s + 4s in backoff.
    let gw = gateway_with_backoff(3, 1000);
    let mut req = request(Some(mock_server.uri()));
    req.config = serde_json::json!({ "agents": ["analyst"] });
    let submitted = std::time::Instant::now();
    let started = gw.start(req).await.unwrap();
    wait_for_result(&gw, &started.task_id).await;

    let result = gw.result(&started.task_id).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert!(result.execution_time_secs < 1.0);
    assert!(submitted.elapsed() < Duration::from_secs(2));
    assert_eq!(gw.webhook_stats(&started.task_id).failure, 0);
}

#[tokio::test]
async fn snapshot_survives_restart_and_reaps_interrupted() {
    let tmp = TempDir::new().unwrap();
    let store = SnapshotStore::new(tmp.path().join("workflows_state.json"));

    let gw = gateway(0);
    let finished = gw.start(request(None)).await.unwrap();
    wait_for_result(&gw, &finished.task_id).await;

    let mut slow = request(None);
    slow.config = serde_json::json!({ "step_delay_ms": 60_000 });
    let interrupted = gw.start(slow).await.unwrap();

    store.save(&gw.registry().snapshot().await).await.unwrap();
    drop(gw);

    let restarted = gateway(0);
    let snapshot = store.load().await.unwrap();
    let report = restarted.registry().restore(&snapshot).await;
    assert_eq!(report.records, 2);
    assert_eq!(report.results, 1);
    assert_eq!(restarted.registry().reap_interrupted("server restarted").await, 1);

    let status = restarted.status(&interrupted.task_id).await.unwrap();
    assert_eq!(status.status, WorkflowStatus::Failed);
    assert_eq!(status.error.as_deref(), Some("server restarted"));
    assert_eq!(
        restarted.result(&finished.task_id).await.unwrap().status,
        WorkflowStatus::Completed
    );
}
