//! Global configuration types for Stagehand.
//!
//! `GlobalConfig` represents the top-level `config.toml` that sizes the
//! registry, stream bridge, webhook dispatcher and executor. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.stagehand/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub streams: StreamConfig,
    #[serde(default)]
    pub webhooks: WebhookSettings,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Workflow registry bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum number of pending + running workflows.
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// Maximum number of retained results.
    #[serde(default = "default_max_completed")]
    pub max_completed: usize,
}

fn default_max_active() -> usize {
    10
}

fn default_max_completed() -> usize {
    100
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            max_completed: default_max_completed(),
        }
    }
}

/// Event stream bridge bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
    /// Per-channel queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Channels older than this are reclaimed by the sweeper.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Read timeout after which a keepalive event is emitted (at least 1s).
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_max_streams() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    3600
}

const MIN_KEEPALIVE_SECS: u64 = 1;

fn default_keepalive_secs() -> u64 {
    15
}

impl StreamConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(MIN_KEEPALIVE_SECS))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_streams: default_max_streams(),
            queue_capacity: default_queue_capacity(),
            ttl_secs: default_ttl_secs(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Outbound webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base; the delay after attempt `n` is `base_delay_ms * 2^n`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Per-attempt request timeout.
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    /// HMAC-SHA256 key; payloads are unsigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

impl WebhookSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_webhook_timeout_secs(),
            signing_key: None,
        }
    }
}

/// Dedicated scheduler timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// How long `start` waits for a submitted workflow to report `Running`.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
}

fn default_startup_timeout_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_ack_timeout_secs() -> u64 {
    5
}

impl ExecutorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
        }
    }
}

/// REST server bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Crash-recovery snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_enabled")]
    pub enabled: bool,
    /// File name inside the data directory.
    #[serde(default = "default_snapshot_file")]
    pub file_name: String,
}

fn default_snapshot_enabled() -> bool {
    true
}

fn default_snapshot_file() -> String {
    "workflows_state.json".to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: default_snapshot_enabled(),
            file_name: default_snapshot_file(),
        }
    }
}
