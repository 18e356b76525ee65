//! Dedicated task executor: one long-lived scheduler thread for every workflow.
//!
//! Request handlers live on the server runtime and finish in milliseconds;
//! workflows can run for minutes. Spawning a workflow onto the request's own
//! runtime would tie its lifetime to whoever owns that runtime, so instead a
//! single `stagehand-scheduler` thread hosts a current-thread tokio runtime
//! that outlives every request. Work units suspend at their own I/O points,
//! which is why one cooperative scheduler is enough.
//!
//! # Lifecycle
//!
//! 1. `start()` spawns the thread and blocks until the runtime hands back its
//!    `Handle` (bounded by `startup_timeout`). Calling it again is a no-op.
//!    Readers such as `is_running()` are never blocked by a pending start.
//! 2. `submit()` / `run()` / `run_sync()` spawn onto that handle from any thread.
//! 3. `stop()` signals the runtime to wind down and joins the thread with a
//!    bounded wait.
//!
//! If the runtime never reports ready, the executor stays unusable and every
//! submission fails fast with [`ExecutorError::NotRunning`].

use std::future::Future;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use stagehand_types::config::ExecutorConfig;
use stagehand_types::error::ExecutorError;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Name of the dedicated scheduler thread (visible in debuggers and `top -H`).
pub const SCHEDULER_THREAD_NAME: &str = "stagehand-scheduler";

/// Extra time granted to the thread to exit after the runtime's own grace period.
const JOIN_SLACK: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Handle to a unit of work submitted to the executor.
///
/// Dropping the handle detaches the work; it keeps running.
#[derive(Debug)]
pub struct TaskHandle {
    inner: JoinHandle<()>,
}

impl TaskHandle {
    /// Whether the unit has finished (successfully, by panic, or by abort).
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Forcefully abort the unit at its next suspension point.
    ///
    /// Workflow cancellation does not use this; it only updates bookkeeping.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Wait for the unit to finish.
    pub async fn join(self) -> Result<(), ExecutorError> {
        self.inner.await.map_err(|_| ExecutorError::Panicked)
    }
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

/// State of a running scheduler thread.
struct Worker {
    handle: Handle,
    shutdown_tx: oneshot::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    thread: ThreadHandle<()>,
}

/// Single-worker scheduler whose lifetime is independent of any request.
///
/// Construct once at startup, share via `Arc`, and call [`start`](Self::start)
/// before submitting work.
pub struct TaskExecutor {
    worker: Mutex<Option<Worker>>,
    /// Serializes `start()` calls without holding `worker` during the wait.
    starting: Mutex<()>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    ack_timeout: Duration,
    #[cfg(test)]
    startup_delay: Duration,
}

impl TaskExecutor {
    /// Create a stopped executor with the given timeouts.
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            worker: Mutex::new(None),
            starting: Mutex::new(()),
            startup_timeout: config.startup_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            ack_timeout: config.ack_timeout(),
            #[cfg(test)]
            startup_delay: Duration::ZERO,
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().expect("executor lock poisoned")
    }

    /// How long callers wait for a submitted unit to acknowledge it started.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Spawn the scheduler thread and wait until it is ready.
    ///
    /// Idempotent: returns `Ok(())` immediately if already running.
    pub fn start(&self) -> Result<(), ExecutorError> {
        let _starting = self.starting.lock().expect("executor start lock poisoned");
        if self.is_running() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel::<Handle>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let grace = self.shutdown_timeout;
        #[cfg(test)]
        let startup_delay = self.startup_delay;

        let thread = std::thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build scheduler runtime");
                        return;
                    }
                };

                #[cfg(test)]
                std::thread::sleep(startup_delay);

                if ready_tx.send(runtime.handle().clone()).is_err() {
                    // start() already gave up waiting
                    return;
                }

                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                runtime.shutdown_timeout(grace);
                let _ = done_tx.send(());
            })
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        match ready_rx.recv_timeout(self.startup_timeout) {
            Ok(handle) => {
                tracing::info!(thread = SCHEDULER_THREAD_NAME, "task executor started");
                *self.worker() = Some(Worker {
                    handle,
                    shutdown_tx,
                    done_rx,
                    thread,
                });
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::error!(
                    timeout = ?self.startup_timeout,
                    "task executor did not become ready; executor is unusable"
                );
                Err(ExecutorError::StartupTimeout(self.startup_timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                Err(ExecutorError::Spawn(
                    "scheduler runtime exited before becoming ready".to_string(),
                ))
            }
        }
    }

    /// Whether the scheduler is running and accepting work.
    pub fn is_running(&self) -> bool {
        self.worker().is_some()
    }

    fn handle(&self) -> Result<Handle, ExecutorError> {
        self.worker()
            .as_ref()
            .map(|w| w.handle.clone())
            .ok_or(ExecutorError::NotRunning)
    }

    /// Schedule a unit of work without waiting for it.
    ///
    /// Callable from any thread, inside or outside a tokio runtime.
    pub fn submit<F>(&self, unit: F) -> Result<TaskHandle, ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle()?;
        Ok(TaskHandle {
            inner: handle.spawn(unit),
        })
    }

    /// Schedule a unit and wait (asynchronously) for its output.
    ///
    /// The unit is aborted if it does not finish within `timeout`. Intended
    /// for short coordination steps, never for a whole workflow.
    pub async fn run<F, T>(&self, unit: F, timeout: Duration) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle()?;
        let mut join = handle.spawn(unit);
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ExecutorError::Panicked),
            Err(_) => {
                join.abort();
                Err(ExecutorError::Timeout(timeout))
            }
        }
    }

    /// Schedule a unit and block the calling thread until it finishes.
    ///
    /// Must not be called from inside an async context (it parks the thread);
    /// use [`run`](Self::run) there instead.
    pub fn run_sync<F, T>(&self, unit: F, timeout: Duration) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle()?;
        let (tx, rx) = mpsc::channel::<T>();
        let join = handle.spawn(async move {
            let value = unit.await;
            let _ = tx.send(value);
        });

        match rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                join.abort();
                Err(ExecutorError::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutorError::Panicked),
        }
    }

    /// Stop the scheduler and join its thread with a bounded wait.
    ///
    /// In-flight units are dropped at their next suspension point. Calling
    /// `stop()` on a stopped executor is a no-op.
    pub fn stop(&self) {
        let worker = self.worker().take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.shutdown_tx.send(());
        match worker.done_rx.recv_timeout(self.shutdown_timeout + JOIN_SLACK) {
            Ok(()) => {
                let _ = worker.thread.join();
                tracing::info!("task executor stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.shutdown_timeout,
                    "task executor did not stop in time; detaching scheduler thread"
                );
            }
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("running", &self.is_running())
            .field("startup_timeout", &self.startup_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_executor() -> TaskExecutor {
        TaskExecutor::new(&ExecutorConfig {
            startup_timeout_secs: 5,
            shutdown_timeout_secs: 1,
            ack_timeout_secs: 1,
        })
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn submit_before_start_fails_fast() {
        let executor = test_executor();
        let result = executor.submit(async {});
        assert!(matches!(result, Err(ExecutorError::NotRunning)));
        assert!(!executor.is_running());
    }

    #[test]
    fn start_is_idempotent() {
        let executor = test_executor();
        executor.start().unwrap();
        executor.start().unwrap();
        assert!(executor.is_running());
        executor.stop();
        assert!(!executor.is_running());
    }

    #[test]
    fn run_sync_returns_unit_output() {
        let executor = test_executor();
        executor.start().unwrap();
        let value = executor
            .run_sync(async { 21 * 2 }, Duration::from_secs(1))
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn run_sync_runs_on_scheduler_thread() {
        let executor = test_executor();
        executor.start().unwrap();
        let name = executor
            .run_sync(
                async { std::thread::current().name().map(str::to_string) },
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(name.as_deref(), Some(SCHEDULER_THREAD_NAME));
    }

    #[test]
    fn run_sync_times_out() {
        let executor = test_executor();
        executor.start().unwrap();
        let result = executor.run_sync(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            },
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(ExecutorError::Timeout(_))));
    }

    #[test]
    fn run_sync_reports_panic() {
        let executor = test_executor();
        executor.start().unwrap();
        let result: Result<(), _> = executor.run_sync(
            async {
                panic!("unit exploded");
            },
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ExecutorError::Panicked)));
        // Scheduler survives the panic
        assert_eq!(executor.run_sync(async { 1 }, Duration::from_secs(1)).unwrap(), 1);
    }

    #[test]
    fn submitted_work_outlives_submitting_runtime() {
        let executor = Arc::new(test_executor());
        executor.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // Submit from a short-lived runtime that is dropped immediately.
        {
            let request_rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let exec = Arc::clone(&executor);
            let c = Arc::clone(&counter);
            request_rt.block_on(async move {
                exec.submit(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            });
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_awaits_output_from_async_context() {
        let executor = test_executor();
        executor.start().unwrap();
        let value = executor.run(async { "ack" }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, "ack");

        let timed_out = executor
            .run(
                async { tokio::time::sleep(Duration::from_secs(5)).await },
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(timed_out, Err(ExecutorError::Timeout(_))));
    }

    #[tokio::test]
    async fn task_handle_join_and_is_finished() {
        let executor = test_executor();
        executor.start().unwrap();
        let handle = executor.submit(async {}).unwrap();
        handle.join().await.unwrap();

        let slow = executor
            .submit(async { tokio::time::sleep(Duration::from_secs(5)).await })
            .unwrap();
        assert!(!slow.is_finished());
        slow.abort();
        assert!(slow.join().await.is_err());
    }

    #[test]
    fn executor_is_shareable_across_threads() {
        assert_send_sync::<TaskExecutor>();
        assert_send_sync::<Arc<TaskExecutor>>();
    }

    #[test]
    fn submit_from_another_thread() {
        let executor = Arc::new(test_executor());
        executor.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let exec = Arc::clone(&executor);
        let c = Arc::clone(&counter);
        let submitter = std::thread::spawn(move || {
            exec.run_sync(
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_secs(1),
            )
        });
        submitter.join().unwrap().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn startup_timeout_leaves_executor_unusable() {
        let mut executor = test_executor();
        executor.startup_timeout = Duration::from_millis(50);
        executor.startup_delay = Duration::from_millis(500);

        let err = executor.start().unwrap_err();
        assert!(matches!(err, ExecutorError::StartupTimeout(_)));
        assert!(!executor.is_running());
        assert!(matches!(executor.submit(async {}), Err(ExecutorError::NotRunning)));
        assert!(matches!(
            executor.run_sync(async { 1 }, Duration::from_secs(1)),
            Err(ExecutorError::NotRunning)
        ));
    }

    #[test]
    fn pending_start_does_not_block_readers() {
        let mut executor = test_executor();
        executor.startup_delay = Duration::from_millis(300);
        let executor = Arc::new(executor);

        let starter = {
            let exec = Arc::clone(&executor);
            std::thread::spawn(move || exec.start())
        };
        std::thread::sleep(Duration::from_millis(50));

        let checked = std::time::Instant::now();
        assert!(!executor.is_running());
        assert!(checked.elapsed() < Duration::from_millis(200));

        starter.join().unwrap().unwrap();
        assert!(executor.is_running());
    }

    #[test]
    fn stop_then_submit_fails() {
        let executor = test_executor();
        executor.start().unwrap();
        executor.stop();
        executor.stop();
        assert!(matches!(executor.submit(async {}), Err(ExecutorError::NotRunning)));
    }
}
