//! Metrics collection for worker pools.
//!
//! Three interchangeable collectors implement [`MetricsCollector`]:
//! - **No-op**: discards everything, for pools that do not need metrics
//! - **In-memory**: lock-free atomic counters with on-demand snapshots
//! - **Logging**: the in-memory collector plus periodic structured reports
//!
//! # Examples
//!
//! ```rust
//! use smithy_pool::metrics::{InMemoryMetrics, MetricsCollector};
//! use std::time::Duration;
//!
//! let metrics = InMemoryMetrics::new();
//! metrics.record_task_checked_out("pool-worker-1");
//! metrics.record_task_completed("pool-worker-1", Duration::from_millis(20));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.tasks_completed, 1);
//! assert_eq!(snapshot.error_rate, 0.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod logging;
pub mod memory;

pub use logging::{LoggingMetrics, ReportSettings};
pub use memory::InMemoryMetrics;

/// Sink for pool lifecycle and task flow events.
///
/// Every method may be called concurrently from any worker.
pub trait MetricsCollector: Send + Sync {
    /// A worker loop started
    fn record_worker_started(&self, worker_id: &str);
    /// A worker loop exited
    fn record_worker_stopped(&self, worker_id: &str);
    /// A panic was recovered inside a worker
    fn record_worker_panicked(&self, worker_id: &str);

    /// A task was handed to a worker
    fn record_task_checked_out(&self, worker_id: &str);
    /// A task finished successfully after `duration`
    fn record_task_completed(&self, worker_id: &str, duration: Duration);
    /// A task failed terminally after `duration`
    fn record_task_failed(&self, worker_id: &str, duration: Duration);
    /// Checkout failed with something other than "no work"
    fn record_checkout_error(&self, worker_id: &str);

    /// Attempt number `attempt` (>= 2) is about to run
    fn record_retry_attempt(&self, attempt: u32);
    /// A task succeeded on attempt `attempts` (> 1)
    fn record_retry_success(&self, attempts: u32);
    /// A task failed on every one of its `attempts`
    fn record_retry_exhausted(&self, attempts: u32);

    /// Point-in-time view of everything recorded so far
    fn snapshot(&self) -> MetricsSnapshot;

    /// Called when the owning pool starts
    fn start(&self) {}

    /// Called once every worker of the owning pool has exited
    fn stop(&self) {}
}

/// Immutable point-in-time read of the collected metrics.
///
/// Rates are percentages in `0.0..=100.0`; throughput is terminal tasks per
/// second of uptime. Every derived value is `0` when its denominator is `0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Workers that have started
    pub workers_started: u64,
    /// Workers that have exited
    pub workers_stopped: u64,
    /// Workers currently running
    pub workers_active: u64,
    /// Panics recovered inside workers
    pub worker_panics: u64,

    /// Tasks handed out by the processor
    pub tasks_checked_out: u64,
    /// Tasks completed successfully
    pub tasks_completed: u64,
    /// Tasks that failed terminally
    pub tasks_failed: u64,
    /// Tasks checked out but not yet completed or failed
    pub tasks_in_progress: u64,
    /// Checkouts that failed with a real error
    pub checkout_errors: u64,

    /// Extra attempts made after a first failure
    pub retry_attempts: u64,
    /// Tasks that succeeded after at least one retry
    pub retry_successes: u64,
    /// Tasks that failed on every attempt
    pub retries_exhausted: u64,
    /// Retry attempts per checked-out task, as a percentage
    pub retry_rate: f64,

    /// Summed processing time of terminal tasks
    pub total_duration: Duration,
    /// Mean processing time of terminal tasks
    pub average_duration: Duration,
    /// Fastest terminal task
    pub min_duration: Duration,
    /// Slowest terminal task
    pub max_duration: Duration,

    /// Terminal tasks per second of uptime
    pub throughput_per_second: f64,
    /// Failed tasks over terminal tasks, as a percentage
    pub error_rate: f64,

    /// When this snapshot was taken
    pub collected_at: DateTime<Utc>,
    /// Time since the collector started
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Tasks that reached `complete` or `fail`.
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }
}

/// Collector that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_worker_started(&self, _worker_id: &str) {}
    fn record_worker_stopped(&self, _worker_id: &str) {}
    fn record_worker_panicked(&self, _worker_id: &str) {}
    fn record_task_checked_out(&self, _worker_id: &str) {}
    fn record_task_completed(&self, _worker_id: &str, _duration: Duration) {}
    fn record_task_failed(&self, _worker_id: &str, _duration: Duration) {}
    fn record_checkout_error(&self, _worker_id: &str) {}
    fn record_retry_attempt(&self, _attempt: u32) {}
    fn record_retry_success(&self, _attempts: u32) {}
    fn record_retry_exhausted(&self, _attempts: u32) {}

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}

/// Percentage of `part` in `whole`, 0 for an empty whole.
pub(crate) fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
