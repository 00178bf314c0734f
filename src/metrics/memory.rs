//! In-memory metrics collector.
//!
//! Counters are plain atomics so recording from many workers never contends
//! on a lock. Only the min/max duration pair sits behind a small mutex, since
//! it needs a compare-and-replace across two values. Every derived figure is
//! computed when a snapshot is taken.

use super::{MetricsCollector, MetricsSnapshot, percentage};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct DurationExtremes {
    min: Option<Duration>,
    max: Duration,
}

/// Atomic-counter collector.
#[derive(Debug)]
pub struct InMemoryMetrics {
    workers_started: AtomicU64,
    workers_stopped: AtomicU64,
    worker_panics: AtomicU64,
    tasks_checked_out: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    checkout_errors: AtomicU64,
    retry_attempts: AtomicU64,
    retry_successes: AtomicU64,
    retries_exhausted: AtomicU64,
    total_duration_nanos: AtomicU64,
    extremes: Mutex<DurationExtremes>,
    started_at: RwLock<Instant>,
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetrics {
    /// Create a collector with all counters at zero
    pub fn new() -> Self {
        Self {
            workers_started: AtomicU64::new(0),
            workers_stopped: AtomicU64::new(0),
            worker_panics: AtomicU64::new(0),
            tasks_checked_out: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            checkout_errors: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            retry_successes: AtomicU64::new(0),
            retries_exhausted: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
            extremes: Mutex::new(DurationExtremes::default()),
            started_at: RwLock::new(Instant::now()),
        }
    }

    /// Number of tasks that reached `complete` or `fail`.
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed) + self.tasks_failed.load(Ordering::Relaxed)
    }

    fn record_duration(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_duration_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mut extremes = self.extremes.lock();
        extremes.min = Some(extremes.min.map_or(duration, |min| min.min(duration)));
        extremes.max = extremes.max.max(duration);
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_worker_started(&self, _worker_id: &str) {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_worker_stopped(&self, _worker_id: &str) {
        self.workers_stopped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_worker_panicked(&self, _worker_id: &str) {
        self.worker_panics.fetch_add(1, Ordering::Relaxed);
    }

    fn record_task_checked_out(&self, _worker_id: &str) {
        self.tasks_checked_out.fetch_add(1, Ordering::Relaxed);
    }

    fn record_task_completed(&self, _worker_id: &str, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    fn record_task_failed(&self, _worker_id: &str, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    fn record_checkout_error(&self, _worker_id: &str) {
        self.checkout_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry_attempt(&self, _attempt: u32) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry_success(&self, _attempts: u32) {
        self.retry_successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry_exhausted(&self, _attempts: u32) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let workers_started = self.workers_started.load(Ordering::Relaxed);
        let workers_stopped = self.workers_stopped.load(Ordering::Relaxed);
        let tasks_checked_out = self.tasks_checked_out.load(Ordering::Relaxed);
        let tasks_completed = self.tasks_completed.load(Ordering::Relaxed);
        let tasks_failed = self.tasks_failed.load(Ordering::Relaxed);
        let retry_attempts = self.retry_attempts.load(Ordering::Relaxed);
        let total_duration = Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed));
        let (min_duration, max_duration) = {
            let extremes = self.extremes.lock();
            (extremes.min.unwrap_or_default(), extremes.max)
        };

        let processed = tasks_completed + tasks_failed;
        let uptime = self.started_at.read().elapsed();
        let average_duration = if processed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((total_duration.as_nanos() / u128::from(processed)) as u64)
        };
        let throughput_per_second = if uptime.is_zero() {
            0.0
        } else {
            processed as f64 / uptime.as_secs_f64()
        };

        MetricsSnapshot {
            workers_started,
            workers_stopped,
            workers_active: workers_started.saturating_sub(workers_stopped),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            tasks_checked_out,
            tasks_completed,
            tasks_failed,
            tasks_in_progress: tasks_checked_out.saturating_sub(processed),
            checkout_errors: self.checkout_errors.load(Ordering::Relaxed),
            retry_attempts,
            retry_successes: self.retry_successes.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            retry_rate: percentage(retry_attempts, tasks_checked_out),
            total_duration,
            average_duration,
            min_duration,
            max_duration,
            throughput_per_second,
            error_rate: percentage(tasks_failed, processed),
            collected_at: Utc::now(),
            uptime,
        }
    }

    fn start(&self) {
        *self.started_at.write() = Instant::now();
    }
}
