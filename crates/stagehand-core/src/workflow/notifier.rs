//! Outbound notification seam used by the gateway.
//!
//! The HTTP webhook dispatcher lives in `stagehand-infra`; the gateway only
//! needs this trait, so it stays free of HTTP dependencies.

use std::future::Future;

use stagehand_types::error::WebhookError;
use stagehand_types::event::ProgressEvent;
use stagehand_types::webhook::DeliveryStats;

/// Delivers progress events to per-task external destinations.
pub trait EventNotifier: Send + Sync + 'static {
    /// Whether a destination is registered for `task_id`.
    fn is_registered(&self, task_id: &str) -> bool;

    /// Deliver one event to the registered destination.
    ///
    /// Returns `true` on success. Failures are absorbed (retried, counted)
    /// and never affect the workflow.
    fn notify(&self, task_id: &str, event: &ProgressEvent) -> impl Future<Output = bool> + Send;

    fn register(&self, task_id: &str, url: &str) -> Result<(), WebhookError>;

    /// Returns whether a registration was removed.
    fn unregister(&self, task_id: &str) -> bool;

    fn stats(&self, task_id: &str) -> DeliveryStats;

    /// Drop every trace of `task_id`, counters included. Called once the
    /// registry no longer retains the workflow.
    fn forget(&self, _task_id: &str) {}
}

/// Notifier that accepts nothing and delivers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
    fn is_registered(&self, _task_id: &str) -> bool {
        false
    }

    async fn notify(&self, _task_id: &str, _event: &ProgressEvent) -> bool {
        false
    }

    fn register(&self, _task_id: &str, url: &str) -> Result<(), WebhookError> {
        Err(WebhookError::InvalidUrl {
            url: url.to_string(),
            reason: "webhook delivery is disabled".to_string(),
        })
    }

    fn unregister(&self, _task_id: &str) -> bool {
        false
    }

    fn stats(&self, _task_id: &str) -> DeliveryStats {
        DeliveryStats::default()
    }
}
