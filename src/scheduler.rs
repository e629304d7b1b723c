//! Periodic ingestion over every configured feed.
//!
//! The [`Scheduler`] runs one cycle immediately when started and then once per
//! interval. Each cycle fans out one task per feed; a unit that fails, times
//! out or panics is counted and logged without affecting its siblings or the
//! loop itself.

use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::feed::FeedProcessor;

/// Default processing interval (3 minutes)
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(180);

/// Default per-feed deadline within a cycle
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a [`Scheduler`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Created,
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulerState::Created => "created",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
            SchedulerState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is {actual}, expected {expected}")]
    InvalidState {
        expected: SchedulerState,
        actual: SchedulerState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between cycle starts
    pub interval: Duration,
    /// Deadline for a single feed within a cycle
    pub unit_timeout: Duration,
    /// Maximum feeds processed at once; 0 means one task per feed
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            max_concurrency: 0,
        }
    }
}

/// Totals for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Units that stopped (or never started) because the scheduler was stopping
    pub cancelled: usize,
    pub total: usize,
    pub entries_saved: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct CycleCounters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    entries_saved: AtomicUsize,
}

struct Inner {
    processor: Arc<dyn FeedProcessor>,
    urls: Arc<[String]>,
    config: SchedulerConfig,
    state: AtomicU8,
    shutdown: CancellationToken,
    span: tracing::Span,
}

/// Drives a [`FeedProcessor`] over a fixed list of feed URLs.
pub struct Scheduler {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        processor: Arc<dyn FeedProcessor>,
        urls: Vec<String>,
        config: SchedulerConfig,
        span: tracing::Span,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                processor,
                urls: urls.into(),
                config,
                state: AtomicU8::new(SchedulerState::Created as u8),
                shutdown: CancellationToken::new(),
                span,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Launches the scheduling loop. The first cycle begins immediately.
    ///
    /// Fails unless the scheduler is freshly created; a stopped scheduler
    /// cannot be restarted.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.inner.transition(SchedulerState::Created, SchedulerState::Running)?;

        tracing::info!(
            parent: &self.inner.span,
            feeds = self.inner.urls.len(),
            interval_secs = self.inner.config.interval.as_secs(),
            "Scheduler started"
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_loop().await });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Requests shutdown and returns without waiting for in-flight work.
    ///
    /// In-flight units observe cancellation through their tokens; use
    /// [`Scheduler::wait`] to block until the loop has exited.
    pub fn stop(&self) {
        let inner = &self.inner;
        if inner
            .transition(SchedulerState::Running, SchedulerState::Stopping)
            .is_ok()
        {
            tracing::info!(parent: &inner.span, "Scheduler stopping");
        } else {
            // Never started: nothing to drain
            let _ = inner.transition(SchedulerState::Created, SchedulerState::Stopped);
        }
        inner.shutdown.cancel();
    }

    /// Waits for the scheduling loop, and every unit it launched, to finish.
    pub async fn wait(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(parent: &self.inner.span, error = %e, "Scheduler loop aborted");
                self.inner
                    .state
                    .store(SchedulerState::Stopped as u8, Ordering::SeqCst);
            }
        }
    }

    /// Runs a single cycle over every feed and returns its totals.
    ///
    /// Used by the loop and directly for one-shot runs. Units observe the
    /// scheduler's shutdown token, so a cycle started after [`Scheduler::stop`]
    /// performs no work.
    pub async fn run_cycle(&self) -> CycleSummary {
        self.inner.run_cycle().await
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    pub fn urls(&self) -> &[String] {
        &self.inner.urls
    }

    pub fn interval(&self) -> Duration {
        self.inner.config.interval
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: SchedulerState, to: SchedulerState) -> Result<(), SchedulerError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| SchedulerError::InvalidState {
                expected: from,
                actual: SchedulerState::from_u8(actual),
            })
    }

    async fn run_loop(self: Arc<Self>) {
        // interval() panics on a zero period
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        self.state
            .store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        tracing::info!(parent: &self.span, "Scheduler stopped");
    }

    async fn run_cycle(&self) -> CycleSummary {
        let started = Instant::now();
        let cycle = self.shutdown.child_token();
        let counters = Arc::new(CycleCounters::default());
        let total = self.urls.len();
        let span = tracing::info_span!(parent: &self.span, "cycle", feeds = total);

        let limit = match self.config.max_concurrency {
            0 => total.max(1),
            n => n,
        };

        // Tasks are spawned lazily as buffer_unordered pulls them, so at most
        // `limit` units are in flight at once
        let mut units = stream::iter(self.urls.iter().cloned())
            .map(|url| {
                let processor = Arc::clone(&self.processor);
                let counters = Arc::clone(&counters);
                let token = cycle.child_token();
                let timeout = self.config.unit_timeout;
                let unit_span = tracing::debug_span!(parent: &span, "unit", url = %url);
                tokio::spawn(
                    run_unit(processor, counters, token, url, timeout).instrument(unit_span),
                )
            })
            .buffer_unordered(limit);

        while let Some(joined) = units.next().await {
            if let Err(e) = joined {
                // The unit panicked before touching its counters
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(parent: &span, error = %e, "Feed task panicked");
            }
        }

        let summary = CycleSummary {
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            total,
            entries_saved: counters.entries_saved.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            parent: &span,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            total = summary.total,
            entries_saved = summary.entries_saved,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        summary
    }
}

async fn run_unit(
    processor: Arc<dyn FeedProcessor>,
    counters: Arc<CycleCounters>,
    cancel: CancellationToken,
    url: String,
    timeout: Duration,
) {
    if cancel.is_cancelled() {
        tracing::debug!("Skipping feed, cycle cancelled");
        counters.cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match tokio::time::timeout(timeout, processor.process_feed(&cancel, &url)).await {
        Ok(Ok(report)) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            counters
                .entries_saved
                .fetch_add(report.saved, Ordering::Relaxed);
        }
        Ok(Err(e)) if e.is_cancelled() || cancel.is_cancelled() => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(stage = %e.stage(), error = %e, "Feed failed");
        }
        Err(_) => {
            cancel.cancel();
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(timeout_secs = timeout.as_secs(), "Feed timed out");
        }
    }
}
