//! Outbound webhook delivery with retries and per-task counters.
//!
//! Each delivery is a JSON POST of [`WebhookPayload`]. A response status
//! below 400 counts as success. Failed attempts are retried up to
//! `max_retries` times, sleeping `base_delay * 2^attempt` in between; a
//! delivery that exhausts every attempt is counted and dropped. Deliveries for
//! the same task are serialized so a receiver sees them in emission order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use stagehand_core::workflow::EventNotifier;
use stagehand_types::config::WebhookSettings;
use stagehand_types::error::WebhookError;
use stagehand_types::event::ProgressEvent;
use stagehand_types::webhook::{DeliveryStats, WebhookPayload};
use tokio::sync::Mutex;

use super::signing::{self, SIGNATURE_HEADER, SIGNATURE_PREFIX};

/// Upper bound on the backoff exponent, so the delay cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Delivers progress events to registered per-task URLs.
pub struct WebhookDispatcher {
    client: Client,
    /// task_id -> destination URL.
    registrations: DashMap<String, String>,
    /// task_id -> counters. Kept after unregistration so stats stay queryable,
    /// dropped by `forget` once the workflow leaves the registry.
    stats: DashMap<String, DeliveryStats>,
    /// task_id -> lock serializing that task's deliveries.
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_retries: u32,
    base_delay: Duration,
    signing_key: Option<Vec<u8>>,
}

impl WebhookDispatcher {
    /// Build a dispatcher. The per-attempt request timeout is enforced by the
    /// HTTP client, independent of the retry budget.
    pub fn new(settings: &WebhookSettings) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| WebhookError::Http(e.to_string()))?;

        let signing_key = settings
            .signing_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|k| k.as_bytes().to_vec());

        Ok(Self {
            client,
            registrations: DashMap::new(),
            stats: DashMap::new(),
            locks: DashMap::new(),
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            signing_key,
        })
    }

    /// Map `task_id` to `url`, replacing any previous registration.
    ///
    /// Only absolute `http`/`https` URLs are accepted.
    pub fn register(&self, task_id: &str, url: &str) -> Result<(), WebhookError> {
        validate_url(url)?;
        self.registrations
            .insert(task_id.to_string(), url.to_string());
        tracing::info!(task_id = %task_id, url = %url, "registered webhook");
        Ok(())
    }

    /// Remove the registration. Delivery counters are kept.
    pub fn unregister(&self, task_id: &str) -> bool {
        self.locks.remove(task_id);
        let removed = self.registrations.remove(task_id).is_some();
        if removed {
            tracing::debug!(task_id = %task_id, "unregistered webhook");
        }
        removed
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.registrations.contains_key(task_id)
    }

    pub fn url(&self, task_id: &str) -> Option<String> {
        self.registrations.get(task_id).map(|r| r.value().clone())
    }

    pub fn stats(&self, task_id: &str) -> DeliveryStats {
        self.stats.get(task_id).map(|s| *s).unwrap_or_default()
    }

    /// Remove the registration, counters and delivery lock of `task_id`.
    pub fn forget(&self, task_id: &str) {
        self.registrations.remove(task_id);
        self.stats.remove(task_id);
        self.locks.remove(task_id);
    }

    pub fn tracked_tasks(&self) -> usize {
        self.stats.len().max(self.locks.len())
    }

    /// Signature header value for `body`, or `None` when signing is disabled.
    pub fn sign(&self, body: &[u8]) -> Result<Option<String>, WebhookError> {
        match &self.signing_key {
            Some(key) => Ok(Some(format!(
                "{SIGNATURE_PREFIX}{}",
                signing::sign_bytes(key, body)?
            ))),
            None => Ok(None),
        }
    }

    /// Deliver one event.
    ///
    /// Sends to `url` if given, otherwise to the registered URL; returns
    /// `false` without counting anything if neither exists.
    pub async fn deliver(&self, task_id: &str, event: &ProgressEvent, url: Option<&str>) -> bool {
        let Some(url) = url.map(str::to_string).or_else(|| self.url(task_id)) else {
            tracing::debug!(task_id = %task_id, "no webhook destination; skipping delivery");
            return false;
        };

        let lock = self
            .locks
            .entry(task_id.to_string())
            .or_default()
            .clone();
        let delivered = {
            let _serialized = lock.lock().await;
            self.deliver_serialized(task_id, event, &url).await
        };
        if !self.is_registered(task_id) {
            // One-off deliveries to an explicit url keep no lock behind.
            self.locks.remove(task_id);
        }
        delivered
    }

    async fn deliver_serialized(&self, task_id: &str, event: &ProgressEvent, url: &str) -> bool {
        let payload = WebhookPayload::new(task_id, event.clone());
        let prepared = signing::canonical_json(&payload)
            .map_err(|e| WebhookError::Payload(e.to_string()))
            .and_then(|body| self.sign(&body).map(|signature| (body, signature)));
        let (body, signature) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to prepare webhook payload");
                self.record(task_id, false);
                return false;
            }
        };

        for attempt in 0..=self.max_retries {
            match self.attempt(url, &body, signature.as_deref()).await {
                Ok(()) => {
                    tracing::debug!(task_id = %task_id, kind = %event.kind, attempt, "webhook delivered");
                    self.record(task_id, true);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        kind = %event.kind,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        error = %e,
                        "webhook attempt failed"
                    );
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(task_id = %task_id, kind = %event.kind, url = %url, "webhook delivery gave up");
        self.record(task_id, false);
        false
    }

    async fn attempt(&self, url: &str, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebhookError::Http(e.to_string()))?;
        let status = response.status();
        if status.as_u16() < 400 {
            Ok(())
        } else {
            Err(WebhookError::Http(format!("HTTP {status}")))
        }
    }

    /// Delay after failed attempt `attempt` (0-based).
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    fn record(&self, task_id: &str, success: bool) {
        let mut stats = self.stats.entry(task_id.to_string()).or_default();
        if success {
            stats.success += 1;
        } else {
            stats.failure += 1;
        }
    }
}

impl EventNotifier for WebhookDispatcher {
    fn is_registered(&self, task_id: &str) -> bool {
        WebhookDispatcher::is_registered(self, task_id)
    }

    async fn notify(&self, task_id: &str, event: &ProgressEvent) -> bool {
        self.deliver(task_id, event, None).await
    }

    fn register(&self, task_id: &str, url: &str) -> Result<(), WebhookError> {
        WebhookDispatcher::register(self, task_id, url)
    }

    fn unregister(&self, task_id: &str) -> bool {
        WebhookDispatcher::unregister(self, task_id)
    }

    fn stats(&self, task_id: &str) -> DeliveryStats {
        WebhookDispatcher::stats(self, task_id)
    }

    fn forget(&self, task_id: &str) {
        WebhookDispatcher::forget(self, task_id)
    }
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("registrations", &self.registrations.len())
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("signing", &self.signing_key.is_some())
            .finish()
    }
}

fn validate_url(url: &str) -> Result<(), WebhookError> {
    let invalid = |reason: &str| WebhookError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn settings(max_retries: u32, signing_key: Option<&str>) -> WebhookSettings {
        WebhookSettings {
            max_retries,
            base_delay_ms: 1,
            timeout_secs: 5,
            signing_key: signing_key.map(str::to_string),
        }
    }

    fn event() -> ProgressEvent {
        ProgressEvent::new("agent_completed", "t-1", serde_json::json!({"agent": "analyst"}))
    }

    #[test]
    fn test_register_validates_url() {
        let dispatcher = WebhookDispatcher::new(&settings(0, None)).unwrap();
        assert!(dispatcher.register("t-1", "https://hooks.example.com/x").is_ok());
        assert!(dispatcher.register("t-2", "http://localhost:9000").is_ok());

        for bad in ["ftp://example.com", "not a url", "/relative/path", "mailto:a@b.c"] {
            let err = dispatcher.register("t-3", bad).unwrap_err();
            assert!(matches!(err, WebhookError::InvalidUrl { .. }), "{bad} accepted");
        }
        assert!(!dispatcher.is_registered("t-3"));
    }

    #[test]
    fn test_unregister_keeps_stats() {
        let dispatcher = WebhookDispatcher::new(&settings(0, None)).unwrap();
        dispatcher.register("t-1", "https://example.com").unwrap();
        dispatcher.record("t-1", true);
        assert!(dispatcher.unregister("t-1"));
        assert!(!dispatcher.unregister("t-1"));
        assert_eq!(dispatcher.stats("t-1").success, 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let dispatcher = WebhookDispatcher::new(&WebhookSettings {
            base_delay_ms: 100,
            ..settings(3, None)
        })
        .unwrap();
        assert_eq!(dispatcher.backoff(0), Duration::from_millis(100));
        assert_eq!(dispatcher.backoff(1), Duration::from_millis(200));
        assert_eq!(dispatcher.backoff(2), Duration::from_millis(400));
        // Large exponents saturate instead of overflowing
        assert!(dispatcher.backoff(u32::MAX) >= dispatcher.backoff(10));
    }

    #[test]
    fn test_forget_drops_counters() {
        let dispatcher = WebhookDispatcher::new(&settings(0, None)).unwrap();
        dispatcher.register("t-1", "https://example.com").unwrap();
        dispatcher.record("t-1", true);
        dispatcher.record("t-2", false);
        assert_eq!(dispatcher.tracked_tasks(), 2);

        dispatcher.forget("t-1");
        assert!(!dispatcher.is_registered("t-1"));
        assert_eq!(dispatcher.stats("t-1"), DeliveryStats::default());
        assert_eq!(dispatcher.stats("t-2").failure, 1);
        assert_eq!(dispatcher.tracked_tasks(), 1);
    }

    #[tokio::test]
    async fn test_explicit_url_delivery_leaves_no_lock() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(0, None)).unwrap();
        assert!(dispatcher.deliver("t-1", &event(), Some(&mock_server.uri())).await);
        assert!(dispatcher.locks.is_empty());

        dispatcher.forget("t-1");
        assert_eq!(dispatcher.tracked_tasks(), 0);
    }

    #[tokio::test]
    async fn test_deliver_without_destination_is_false() {
        let dispatcher = WebhookDispatcher::new(&settings(0, None)).unwrap();
        assert!(!dispatcher.deliver("t-1", &event(), None).await);
        assert_eq!(dispatcher.stats("t-1"), DeliveryStats::default());
    }

    #[tokio::test]
    async fn test_deliver_success_posts_payload() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(3, None)).unwrap();
        dispatcher
            .register("t-1", &format!("{}/hook", mock_server.uri()))
            .unwrap();
        assert!(dispatcher.deliver("t-1", &event(), None).await);

        let stats = dispatcher.stats("t-1");
        assert_eq!(stats, DeliveryStats { success: 1, failure: 0 });

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["task_id"], "t-1");
        assert_eq!(body["event"]["kind"], "agent_completed");
        assert!(body["timestamp"].is_string());
        assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_always_failing_endpoint_counts_one_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Error"))
            .expect(4) // max_retries + 1
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(3, None)).unwrap();
        dispatcher.register("t-1", &mock_server.uri()).unwrap();

        assert!(!dispatcher.deliver("t-1", &event(), None).await);
        assert_eq!(dispatcher.stats("t-1"), DeliveryStats { success: 0, failure: 1 });
    }

    #[tokio::test]
    async fn test_fail_then_succeed_counts_one_success() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(3, None)).unwrap();
        dispatcher.register("t-1", &mock_server.uri()).unwrap();

        assert!(dispatcher.deliver("t-1", &event(), None).await);
        assert_eq!(dispatcher.stats("t-1"), DeliveryStats { success: 1, failure: 0 });
    }

    #[tokio::test]
    async fn test_client_error_is_retried_then_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(1, None)).unwrap();
        assert!(!dispatcher.deliver("t-1", &event(), Some(&mock_server.uri())).await);
        assert_eq!(dispatcher.stats("t-1").failure, 1);
    }

    #[tokio::test]
    async fn test_explicit_url_overrides_registration() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/explicit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(0, None)).unwrap();
        dispatcher
            .register("t-1", "http://127.0.0.1:9/unreachable")
            .unwrap();
        let url = format!("{}/explicit", mock_server.uri());
        assert!(dispatcher.deliver("t-1", &event(), Some(&url)).await);
    }

    #[tokio::test]
    async fn test_signed_delivery_verifies_against_body() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dispatcher = WebhookDispatcher::new(&settings(0, Some("shared-secret"))).unwrap();
        dispatcher.register("t-1", &mock_server.uri()).unwrap();
        assert!(dispatcher.deliver("t-1", &event(), None).await);

        let requests = mock_server.received_requests().await.unwrap();
        let header = requests[0]
            .headers
            .get(SIGNATURE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(header.starts_with(SIGNATURE_PREFIX));
        assert!(signing::verify_bytes(b"shared-secret", &requests[0].body, &header));

        let payload: WebhookPayload = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(signing::verify(&payload, &header, b"shared-secret"));
        assert!(!signing::verify_bytes(b"other-secret", &requests[0].body, &header));
    }
}
