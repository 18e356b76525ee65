//! Outbound webhook payload and delivery bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::ProgressEvent;

/// Body POSTed to a registered webhook endpoint.
///
/// Receivers must tolerate duplicates: a delivery may be attempted up to
/// `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub task_id: String,
    pub event: ProgressEvent,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn new(task_id: impl Into<String>, event: ProgressEvent) -> Self {
        Self {
            task_id: task_id.into(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Per-task delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Deliveries that eventually succeeded (counted once, regardless of attempts).
    pub success: u64,
    /// Deliveries that exhausted every attempt.
    pub failure: u64,
}
