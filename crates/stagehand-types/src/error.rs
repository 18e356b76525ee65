use thiserror::Error;

/// Errors raised by the workflow registry's admission checks.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("capacity exceeded: {active} active workflows (max {max}); retry once a running workflow finishes")]
    Capacity { active: usize, max: usize },

    #[error("task id '{0}' already exists")]
    Conflict(String),
}

/// Errors raised by the event stream bridge.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("capacity exceeded: {open} open event streams (max {max})")]
    Capacity { open: usize, max: usize },
}

/// Errors raised by the dedicated task executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("task executor is not running; call start() before submitting work")]
    NotRunning,

    #[error("task executor did not become ready within {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(String),

    #[error("work unit did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("work unit panicked or was aborted")]
    Panicked,
}

/// Errors reported by an orchestrator collaborator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unsupported workflow kind: '{0}'")]
    UnsupportedKind(String),

    #[error("orchestration failed: {0}")]
    Failed(String),
}

/// Errors raised while registering or signing outbound webhooks.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("failed to serialize webhook payload: {0}")]
    Payload(String),

    #[error("webhook request failed: {0}")]
    Http(String),
}

/// Errors returned synchronously by the orchestration gateway.
///
/// Execution failures never surface here; they are recorded as a `Failed`
/// workflow instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("execution backend unavailable: {0}")]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_is_descriptive() {
        let err = RegistryError::Capacity { active: 10, max: 10 };
        let msg = err.to_string();
        assert!(msg.contains("capacity exceeded"));
        assert!(msg.contains("max 10"));
    }

    #[test]
    fn test_gateway_error_wraps_registry_error_transparently() {
        let err: GatewayError = RegistryError::Conflict("t-1".to_string()).into();
        assert_eq!(err.to_string(), "task id 't-1' already exists");
    }

    #[test]
    fn test_gateway_error_wraps_executor_error() {
        let err: GatewayError = ExecutorError::NotRunning.into();
        assert!(err.to_string().starts_with("execution backend unavailable"));
    }
}
