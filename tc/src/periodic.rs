//! Periodic callback scheduling with drift correction
//!
//! Fires a callback on a fixed cadence. A slow callback delays the next
//! tick instead of overlapping it, and whole missed periods are skipped
//! rather than replayed back-to-back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Errors from periodic scheduler construction
#[derive(Debug, Error)]
pub enum PeriodicError {
    #[error("Invalid periodic config: {reason}")]
    InvalidConfig { reason: String },
}

/// Periodic scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicConfig {
    /// Tick period in milliseconds, must be strictly positive
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

fn default_period_ms() -> u64 {
    1000
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self { period_ms: 1000 }
    }
}

impl PeriodicConfig {
    /// Get the period as a Duration
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Tick statistics for diagnostics
#[derive(Debug, Default, Clone, Serialize)]
pub struct PeriodicStats {
    pub ticks: u64,
    pub callback_failures: u64,
}

struct TickCounters {
    ticks: AtomicU64,
    callback_failures: AtomicU64,
}

type Callback = Arc<dyn Fn() -> eyre::Result<()> + Send + Sync>;

/// The PeriodicScheduler invokes a callback every period
///
/// At most one invocation is ever in flight: the tick task runs the
/// callback synchronously and only re-arms afterwards. When an invocation
/// overruns its period, the next tick lands on the first period boundary
/// after completion; missed boundaries are skipped, never replayed.
/// Callback errors are logged and counted, never fatal to the scheduler.
pub struct PeriodicScheduler {
    period: Duration,
    callback: Callback,
    running: Arc<AtomicBool>,
    counters: Arc<TickCounters>,
    /// Handle of the armed tick task, aborted by stop()
    task: Option<JoinHandle<()>>,
}

impl PeriodicScheduler {
    /// Create an idle scheduler; start() arms it
    pub fn new(
        config: PeriodicConfig,
        callback: impl Fn() -> eyre::Result<()> + Send + Sync + 'static,
    ) -> Result<Self, PeriodicError> {
        debug!(?config, "PeriodicScheduler::new: called");
        if config.period_ms == 0 {
            return Err(PeriodicError::InvalidConfig {
                reason: "period must be strictly positive".to_string(),
            });
        }

        Ok(Self {
            period: config.period(),
            callback: Arc::new(callback),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(TickCounters {
                ticks: AtomicU64::new(0),
                callback_failures: AtomicU64::new(0),
            }),
            task: None,
        })
    }

    /// Arm the scheduler: the first tick fires immediately
    ///
    /// Calling start() on a running scheduler is a no-op: a second tick
    /// task would break the no-overlap guarantee.
    pub fn start(&mut self) {
        debug!(period = ?self.period, "PeriodicScheduler::start: called");
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("PeriodicScheduler::start: already running, ignoring");
            return;
        }

        let running = self.running.clone();
        let callback = self.callback.clone();
        let counters = self.counters.clone();
        let period = self.period;
        let first_deadline = Instant::now();
        self.task = Some(tokio::spawn(async move {
            tick_loop(running, callback, counters, period, first_deadline).await;
        }));
    }

    /// Disarm the scheduler, cancelling any armed tick; idempotent
    ///
    /// Safe to restart with start() afterwards.
    pub fn stop(&mut self) {
        debug!("PeriodicScheduler::stop: called");
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }

    /// Whether the scheduler is currently armed
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get tick statistics; counters survive stop/start cycles
    pub fn stats(&self) -> PeriodicStats {
        PeriodicStats {
            ticks: self.counters.ticks.load(Ordering::SeqCst),
            callback_failures: self.counters.callback_failures.load(Ordering::SeqCst),
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    running: Arc<AtomicBool>,
    callback: Callback,
    counters: Arc<TickCounters>,
    period: Duration,
    first_deadline: Instant,
) {
    debug!(?period, "tick_loop: task started");
    let mut next_deadline = first_deadline;
    loop {
        tokio::time::sleep_until(next_deadline).await;

        // Covers the race between stop() and an already-armed tick
        if !running.load(Ordering::SeqCst) {
            break;
        }

        counters.ticks.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = (callback)() {
            counters.callback_failures.fetch_add(1, Ordering::SeqCst);
            error!(error = %e, "tick_loop: periodic callback failed");
        }

        let now = Instant::now();
        if next_deadline <= now {
            next_deadline = advance_deadline(next_deadline, now, period);
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }
    }
    debug!("tick_loop: task stopped");
}

/// Advance a lapsed deadline to the first period boundary strictly past
/// `now`, skipping any boundaries the last invocation overran
fn advance_deadline(next_deadline: Instant, now: Instant, period: Duration) -> Instant {
    let behind = now.duration_since(next_deadline);
    let missed = behind.as_nanos() / period.as_nanos() + 1;
    next_deadline + period * (missed as u32)
}
