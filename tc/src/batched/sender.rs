//! Batched sender implementation

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelError};

use super::config::BatchedSenderConfig;

/// Counters for a batched sender, monotonically increasing
#[derive(Debug, Default, Clone, Serialize)]
pub struct SenderStats {
    pub message_count: u64,
    pub batch_count: u64,
    pub byte_count: u64,
}

/// Sender state snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SenderState {
    pub buffered: usize,
    pub started: bool,
    pub stopping: bool,
    pub stats: SenderStats,
}

/// Internal state protected by mutex
struct SenderInner<T> {
    /// Pending messages, FIFO, drained whole on each flush
    buffer: Vec<T>,

    /// Earliest time the next flush may happen; None means idle
    next_deadline: Option<Instant>,

    /// Set once by close/abort, never cleared
    stopping: bool,

    /// Channel bound by start()
    channel: Option<Arc<dyn Channel<T>>>,

    /// Most recently flushed batches, oldest evicted first
    recent_batches: VecDeque<Vec<T>>,

    /// Counters
    stats: SenderStats,
}

/// State shared between the handle and the background flush task
struct Shared<T> {
    inner: Mutex<SenderInner<T>>,
    waker: Notify,
}

/// The BatchedSender coalesces messages into batches on a channel,
/// writing no more than one batch per flush interval.
///
/// Batching several messages at once helps performance when sending a
/// myriad of tiny messages. The receiving side observes whole batches,
/// preserving send order. A single background task is the sole writer to
/// the bound channel, even under concurrent `send` callers.
pub struct BatchedSender<T> {
    config: BatchedSenderConfig,
    shared: Arc<Shared<T>>,
    /// Handle of the background flush task; joined during close()
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> BatchedSender<T> {
    /// Create a new sender with the given configuration, not yet bound
    /// to a channel
    pub fn new(config: BatchedSenderConfig) -> Self {
        debug!(?config, "BatchedSender::new: called");
        Self {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(SenderInner {
                    buffer: Vec::new(),
                    next_deadline: None,
                    stopping: false,
                    channel: None,
                    recent_batches: VecDeque::new(),
                    stats: SenderStats::default(),
                }),
                waker: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Bind a channel and spawn the background flush task
    ///
    /// Messages sent before start() are already buffered and get flushed
    /// once the task is running. Calling start() twice is a no-op.
    pub async fn start(&self, channel: Arc<dyn Channel<T>>) {
        debug!("BatchedSender::start: called");
        let mut task_guard = self.task.lock().await;
        if task_guard.is_some() {
            warn!("BatchedSender::start: already started, ignoring");
            return;
        }

        {
            let mut inner = self.shared.inner.lock().await;
            inner.channel = Some(channel.clone());
        }

        let shared = self.shared.clone();
        let interval = self.config.flush_interval();
        let capacity = self.config.recent_batch_capacity;
        *task_guard = Some(tokio::spawn(async move {
            background_flush(shared, channel, interval, capacity).await;
        }));

        debug!("BatchedSender::start: flush task spawned");
    }

    /// Schedule a message for sending to the other side
    ///
    /// This completes quickly: the message is appended to the pending
    /// buffer and the flush task is woken if it is idle with no deadline
    /// armed. No I/O happens on this path. Fails with
    /// [`ChannelError::Closed`] (without enqueueing) if the bound channel
    /// already reports itself closed.
    pub async fn send(&self, msg: T) -> Result<(), ChannelError> {
        let wake = {
            let mut inner = self.shared.inner.lock().await;
            if let Some(channel) = &inner.channel
                && channel.is_closed()
            {
                debug!("BatchedSender::send: channel closed, rejecting");
                return Err(ChannelError::Closed);
            }

            inner.stats.message_count += 1;
            inner.buffer.push(msg);
            // Avoid spurious wakeups: the task self-wakes on its armed
            // deadline, so only an idle task needs the signal
            inner.next_deadline.is_none()
        };

        if wake {
            self.shared.waker.notify_one();
        }
        Ok(())
    }

    /// Flush remaining messages, stop the background task, close the
    /// channel
    ///
    /// Blocks until the flush task has fully stopped. Any messages still
    /// buffered at that point (enqueued after the task's final check) get
    /// one last direct write before the channel is closed; a
    /// [`ChannelError::Closed`] during that write is swallowed. Idempotent,
    /// and a no-op if no channel was ever bound.
    pub async fn close(&self) -> Result<(), ChannelError> {
        debug!("BatchedSender::close: called");
        let mut task_guard = self.task.lock().await;

        let channel = {
            let mut inner = self.shared.inner.lock().await;
            let Some(channel) = inner.channel.clone() else {
                debug!("BatchedSender::close: no channel bound, nothing to do");
                return Ok(());
            };
            inner.stopping = true;
            channel
        };
        self.shared.waker.notify_one();

        if let Some(handle) = task_guard.take() {
            debug!("BatchedSender::close: waiting for flush task to stop");
            if let Err(e) = handle.await {
                warn!(error = %e, "BatchedSender::close: flush task did not stop cleanly");
            }
        }

        if channel.is_closed() {
            debug!("BatchedSender::close: channel already closed");
            return Ok(());
        }

        let payload = {
            let mut inner = self.shared.inner.lock().await;
            std::mem::take(&mut inner.buffer)
        };
        if !payload.is_empty() {
            debug!(len = payload.len(), "BatchedSender::close: flushing remaining messages");
            match channel.write(payload).await {
                Ok(_) => {}
                Err(ChannelError::Closed) => {
                    debug!("BatchedSender::close: channel closed during final flush");
                }
                Err(e) => return Err(e),
            }
        }

        match channel.close().await {
            Ok(()) | Err(ChannelError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Tear down without flushing: buffered messages are discarded and
    /// the channel is aborted
    ///
    /// Does not wait for the background task to observe the stop; the
    /// task exits on its own once it sees the empty, stopping buffer.
    pub async fn abort(&self) {
        debug!("BatchedSender::abort: called");
        let channel = {
            let mut inner = self.shared.inner.lock().await;
            let Some(channel) = inner.channel.clone() else {
                debug!("BatchedSender::abort: no channel bound, nothing to do");
                return;
            };
            inner.stopping = true;
            let discarded = inner.buffer.len();
            inner.buffer.clear();
            if discarded > 0 {
                debug!(discarded, "BatchedSender::abort: discarded buffered messages");
            }
            channel
        };
        self.shared.waker.notify_one();

        if !channel.is_closed() {
            channel.abort();
        }
    }

    /// Get the sender counters
    pub async fn stats(&self) -> SenderStats {
        let inner = self.shared.inner.lock().await;
        inner.stats.clone()
    }

    /// Get a state snapshot for diagnostics
    pub async fn state(&self) -> SenderState {
        let inner = self.shared.inner.lock().await;
        SenderState {
            buffered: inner.buffer.len(),
            started: inner.channel.is_some(),
            stopping: inner.stopping,
            stats: inner.stats.clone(),
        }
    }

    /// Get the most recently flushed batches, oldest first
    pub async fn recent_batches(&self) -> Vec<Vec<T>> {
        let inner = self.shared.inner.lock().await;
        inner.recent_batches.iter().cloned().collect()
    }
}

impl<T> Drop for BatchedSender<T> {
    fn drop(&mut self) {
        // A sender dropped without close() must not leak its flush task
        if let Ok(mut guard) = self.task.try_lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}

/// Background flush loop: the sole writer to the channel
///
/// Waits for the waker or the armed deadline, drains the whole buffer as
/// one batch no more often than once per interval, and exits once
/// stopping is observed with nothing left to do. Write failures are
/// terminal: the loop logs and stops, it never retries.
async fn background_flush<T: Clone + Send + 'static>(
    shared: Arc<Shared<T>>,
    channel: Arc<dyn Channel<T>>,
    interval: Duration,
    capacity: usize,
) {
    debug!(?interval, "background_flush: task started");
    loop {
        let (deadline, stopping) = {
            let inner = shared.inner.lock().await;
            (inner.next_deadline, inner.stopping)
        };

        // Once stopping is set the wait is skipped so shutdown never
        // stalls on an armed deadline
        if !stopping {
            match deadline {
                Some(at) => {
                    let _ = tokio::time::timeout_at(at, shared.waker.notified()).await;
                }
                None => shared.waker.notified().await,
            }
        }

        let payload = {
            let mut inner = shared.inner.lock().await;

            if inner.buffer.is_empty() {
                if inner.stopping {
                    break;
                }
                // Nothing to send: go idle so the next send wakes us
                inner.next_deadline = None;
                continue;
            }

            if let Some(at) = inner.next_deadline
                && Instant::now() < at
            {
                if inner.stopping {
                    // Rate limit still holds the remainder back; leave it
                    // for close()'s final direct flush
                    break;
                }
                // Spurious wakeup from send: interval not expired yet
                continue;
            }

            let payload = std::mem::take(&mut inner.buffer);
            inner.stats.batch_count += 1;
            inner.next_deadline = Some(Instant::now() + interval);
            if inner.recent_batches.len() >= capacity {
                inner.recent_batches.pop_front();
            }
            inner.recent_batches.push_back(payload.clone());
            payload
        };

        debug!(len = payload.len(), "background_flush: writing batch");
        match channel.write(payload).await {
            Ok(nbytes) => {
                let mut inner = shared.inner.lock().await;
                inner.stats.byte_count += nbytes as u64;
            }
            Err(e) if e.is_closed() => {
                info!("background_flush: channel closed, stopping");
                break;
            }
            Err(e) => {
                error!(error = %e, "background_flush: batched write failed, stopping");
                break;
            }
        }
    }
    debug!("background_flush: task stopped");
}
