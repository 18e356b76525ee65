//! Per-task event queues between a running workflow and its stream subscriber.
//!
//! Each task gets at most one bounded FIFO channel. Producers never block:
//! a full queue is reported back as [`PushOutcome::QueueFull`]. The consumer
//! side is a [`ProgressStream`] that attaches when created, yields keepalives
//! while idle and removes the channel when it ends, whether it reached the
//! close sentinel or was dropped early by the subscriber (polled or not).
//!
//! A channel is removed exactly once: by `close()`, by the TTL sweep, or by
//! its own consumer ending. The generation number stops a stale consumer from
//! removing a newer channel opened under the same task id.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_stream::stream;
use futures_util::Stream;
use stagehand_types::config::StreamConfig;
use stagehand_types::error::StreamError;
use stagehand_types::event::ProgressEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Boxed event stream handed to subscribers.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send + 'static>>;

/// Result of pushing one event into a task's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued for the consumer.
    Delivered,
    /// The queue is at capacity; the event was rejected.
    QueueFull,
    /// No channel is open for this task (nobody is listening).
    NoListener,
}

enum StreamItem {
    Event(ProgressEvent),
    Close,
}

struct StreamChannel {
    created_at: Instant,
    generation: u64,
    sender: mpsc::Sender<StreamItem>,
    /// Taken by the first consumer; `None` afterwards.
    receiver: Mutex<Option<mpsc::Receiver<StreamItem>>>,
}

struct BridgeInner {
    channels: Mutex<HashMap<String, Arc<StreamChannel>>>,
    next_generation: AtomicU64,
    max_streams: usize,
    capacity: usize,
    ttl: Duration,
}

impl BridgeInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<StreamChannel>>> {
        self.channels.lock().expect("stream bridge lock poisoned")
    }

    /// Remove every expired channel from an already-locked map.
    fn sweep_locked(&self, channels: &mut HashMap<String, Arc<StreamChannel>>) -> usize {
        let ttl = self.ttl;
        let expired: Vec<String> = channels
            .iter()
            .filter(|(_, ch)| ch.created_at.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in &expired {
            if let Some(channel) = channels.remove(task_id) {
                let _ = channel.sender.try_send(StreamItem::Close);
                tracing::debug!(task_id = %task_id, "swept expired event stream");
            }
        }
        expired.len()
    }

    fn open_locked(
        &self,
        channels: &mut HashMap<String, Arc<StreamChannel>>,
        task_id: &str,
    ) -> Result<Arc<StreamChannel>, StreamError> {
        self.sweep_locked(channels);

        if let Some(existing) = channels.get(task_id) {
            return Ok(Arc::clone(existing));
        }
        if channels.len() >= self.max_streams {
            return Err(StreamError::Capacity {
                open: channels.len(),
                max: self.max_streams,
            });
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let channel = Arc::new(StreamChannel {
            created_at: Instant::now(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            sender,
            receiver: Mutex::new(Some(receiver)),
        });
        channels.insert(task_id.to_string(), Arc::clone(&channel));
        tracing::debug!(task_id = %task_id, open = channels.len(), "opened event stream");
        Ok(channel)
    }

    fn take_receiver(&self, task_id: &str) -> Option<(mpsc::Receiver<StreamItem>, u64)> {
        let channels = self.lock();
        let channel = channels.get(task_id)?;
        let receiver = channel
            .receiver
            .lock()
            .expect("stream receiver lock poisoned")
            .take()?;
        Some((receiver, channel.generation))
    }

    fn remove_generation(&self, task_id: &str, generation: u64) {
        let mut channels = self.lock();
        if channels
            .get(task_id)
            .is_some_and(|ch| ch.generation == generation)
        {
            channels.remove(task_id);
            tracing::debug!(task_id = %task_id, "event stream closed by consumer");
        }
    }
}

/// Removes the consumer's channel when its stream ends or is dropped.
struct CloseOnDrop {
    inner: Arc<BridgeInner>,
    task_id: String,
    generation: u64,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.inner.remove_generation(&self.task_id, self.generation);
    }
}

// ---------------------------------------------------------------------------
// EventStreamBridge
// ---------------------------------------------------------------------------

/// Registry of bounded per-task event channels.
///
/// Cheap to clone; clones share the same channel map.
#[derive(Clone)]
pub struct EventStreamBridge {
    inner: Arc<BridgeInner>,
}

impl EventStreamBridge {
    pub fn new(config: &StreamConfig) -> Self {
        Self::with_limits(config.max_streams, config.queue_capacity, config.ttl())
    }

    /// Build a bridge with explicit limits. A zero queue capacity is raised to 1.
    pub fn with_limits(max_streams: usize, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                channels: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                max_streams,
                capacity: capacity.max(1),
                ttl,
            }),
        }
    }

    /// Open a channel for `task_id`. Opening an already-open id is a no-op.
    ///
    /// Expired channels are swept before the capacity check.
    pub fn open(&self, task_id: &str) -> Result<(), StreamError> {
        let mut channels = self.inner.lock();
        self.inner.open_locked(&mut channels, task_id).map(|_| ())
    }

    /// Enqueue an event without blocking.
    ///
    /// With `create_if_missing`, an absent channel is opened first (and the
    /// open may fail on capacity). Otherwise pushing to an absent channel
    /// reports [`PushOutcome::NoListener`].
    pub fn push(
        &self,
        task_id: &str,
        event: ProgressEvent,
        create_if_missing: bool,
    ) -> Result<PushOutcome, StreamError> {
        let channel = {
            let mut channels = self.inner.lock();
            let existing = channels.get(task_id).cloned();
            match existing {
                Some(channel) => channel,
                None if create_if_missing => self.inner.open_locked(&mut channels, task_id)?,
                None => return Ok(PushOutcome::NoListener),
            }
        };

        match channel.sender.try_send(StreamItem::Event(event)) {
            Ok(()) => Ok(PushOutcome::Delivered),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(task_id = %task_id, "event stream queue full; event rejected");
                Ok(PushOutcome::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Ok(PushOutcome::NoListener),
        }
    }

    /// Attach the single consumer of `task_id` and yield its events in FIFO order.
    ///
    /// The receiver is taken immediately, so dropping the returned stream
    /// removes the channel even if it was never polled. Yields a keepalive
    /// whenever nothing arrives within `read_timeout` and ends on close. If the
    /// channel does not exist, or another consumer already attached, the
    /// stream ends immediately.
    pub fn consume(&self, task_id: &str, read_timeout: Duration) -> ProgressStream {
        let task_id = task_id.to_string();
        let attached = self.inner.take_receiver(&task_id).map(|(receiver, generation)| {
            let guard = CloseOnDrop {
                inner: Arc::clone(&self.inner),
                task_id: task_id.clone(),
                generation,
            };
            (receiver, guard)
        });

        Box::pin(stream! {
            if let Some((mut receiver, _guard)) = attached {
                loop {
                    match tokio::time::timeout(read_timeout, receiver.recv()).await {
                        Ok(Some(StreamItem::Event(event))) => yield event,
                        Ok(Some(StreamItem::Close)) | Ok(None) => break,
                        Err(_) => yield ProgressEvent::keepalive(task_id.clone()),
                    }
                }
            } else {
                tracing::debug!(task_id = %task_id, "no consumable event stream");
            }
        })
    }

    /// Remove the channel and signal its consumer to finish.
    ///
    /// Events already queued ahead of the sentinel are still delivered.
    pub fn close(&self, task_id: &str) {
        let removed = self.inner.lock().remove(task_id);
        if let Some(channel) = removed {
            // If the queue is full the sentinel is dropped, but removing the
            // channel drops the only sender, which ends the consumer anyway.
            let _ = channel.sender.try_send(StreamItem::Close);
            tracing::debug!(task_id = %task_id, "closed event stream");
        }
    }

    /// Remove every channel older than the TTL, whether or not it is consumed.
    pub fn sweep(&self) -> usize {
        let mut channels = self.inner.lock();
        self.inner.sweep_locked(&mut channels)
    }

    pub fn is_open(&self, task_id: &str) -> bool {
        self.inner.lock().contains_key(task_id)
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Interval used by the background sweeper: a quarter of the TTL, at least 1s.
    pub fn sweep_interval(&self) -> Duration {
        (self.inner.ttl / 4).max(Duration::from_secs(1))
    }

    /// Run `sweep()` every `every` on the current runtime until `shutdown` fires.
    pub fn spawn_sweeper(
        &self,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = bridge.sweep();
                        if swept > 0 {
                            tracing::info!(swept, "swept expired event streams");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for EventStreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamBridge")
            .field("open", &self.open_count())
            .field("max_streams", &self.inner.max_streams)
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}
