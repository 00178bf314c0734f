//! Logging metrics collector.
//!
//! Wraps [`InMemoryMetrics`] and emits structured snapshots through `tracing`:
//! - on a fixed wall-clock interval
//! - whenever enough tasks finished since the previous report
//! - once more when the owning pool stops

use super::{InMemoryMetrics, MetricsCollector, MetricsSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// When a [`LoggingMetrics`] collector emits reports.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Report on this fixed interval (`None` disables the interval loop)
    pub interval: Option<Duration>,
    /// Report once this many tasks finished since the last report
    pub every_tasks: Option<u64>,
    /// Emit a final report when the pool stops
    pub on_stop: bool,
    /// How often the task-count threshold is checked
    pub threshold_poll: Duration,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(60)),
            every_tasks: None,
            on_stop: true,
            threshold_poll: Duration::from_secs(1),
        }
    }
}

impl ReportSettings {
    /// Report every `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            ..Default::default()
        }
    }

    /// Also report whenever `tasks` more tasks have finished.
    pub fn with_task_threshold(mut self, tasks: u64) -> Self {
        self.every_tasks = Some(tasks);
        self
    }

    /// Enable or disable the final report on stop.
    pub fn with_final_report(mut self, enabled: bool) -> Self {
        self.on_stop = enabled;
        self
    }
}

#[derive(Debug)]
struct Reporter {
    name: String,
    metrics: Arc<InMemoryMetrics>,
    last_reported: AtomicU64,
    reports: AtomicU64,
}

impl Reporter {
    fn report(&self, reason: &'static str) {
        let snapshot = self.metrics.snapshot();
        self.last_reported
            .store(snapshot.tasks_processed(), Ordering::Relaxed);
        self.reports.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            pool = %self.name,
            reason,
            workers_active = snapshot.workers_active,
            worker_panics = snapshot.worker_panics,
            tasks_checked_out = snapshot.tasks_checked_out,
            tasks_completed = snapshot.tasks_completed,
            tasks_failed = snapshot.tasks_failed,
            tasks_in_progress = snapshot.tasks_in_progress,
            checkout_errors = snapshot.checkout_errors,
            retry_attempts = snapshot.retry_attempts,
            retry_rate = snapshot.retry_rate,
            error_rate = snapshot.error_rate,
            throughput_per_second = snapshot.throughput_per_second,
            average_duration_ms = snapshot.average_duration.as_millis() as u64,
            max_duration_ms = snapshot.max_duration.as_millis() as u64,
            uptime_secs = snapshot.uptime.as_secs(),
            "🔨 Pool metrics"
        );
    }
}

/// Collector that periodically logs its snapshots.
#[derive(Debug)]
pub struct LoggingMetrics {
    reporter: Arc<Reporter>,
    settings: ReportSettings,
    token: Mutex<Option<CancellationToken>>,
}

impl LoggingMetrics {
    /// Create a collector reporting under `name` with the given settings
    pub fn new(name: impl Into<String>, settings: ReportSettings) -> Self {
        Self {
            reporter: Arc::new(Reporter {
                name: name.into(),
                metrics: Arc::new(InMemoryMetrics::new()),
                last_reported: AtomicU64::new(0),
                reports: AtomicU64::new(0),
            }),
            settings,
            token: Mutex::new(None),
        }
    }

    /// Number of reports emitted so far.
    pub fn reports_emitted(&self) -> u64 {
        self.reporter.reports.load(Ordering::Relaxed)
    }

    /// Emit a report right now.
    pub fn report_now(&self) {
        self.reporter.report("manual");
    }

    fn spawn_interval_loop(&self, handle: &Handle, token: CancellationToken, period: Duration) {
        let reporter = Arc::clone(&self.reporter);
        handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => reporter.report("interval"),
                }
            }
        });
    }

    fn spawn_threshold_loop(&self, handle: &Handle, token: CancellationToken, threshold: u64) {
        let reporter = Arc::clone(&self.reporter);
        let poll = self.settings.threshold_poll;
        handle.spawn(async move {
            let mut ticker = interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let processed = reporter.metrics.tasks_processed();
                        let since = processed.saturating_sub(reporter.last_reported.load(Ordering::Relaxed));
                        if since >= threshold {
                            reporter.report("task_threshold");
                        }
                    }
                }
            }
        });
    }
}

impl MetricsCollector for LoggingMetrics {
    fn record_worker_started(&self, worker_id: &str) {
        self.reporter.metrics.record_worker_started(worker_id);
    }

    fn record_worker_stopped(&self, worker_id: &str) {
        self.reporter.metrics.record_worker_stopped(worker_id);
    }

    fn record_worker_panicked(&self, worker_id: &str) {
        self.reporter.metrics.record_worker_panicked(worker_id);
    }

    fn record_task_checked_out(&self, worker_id: &str) {
        self.reporter.metrics.record_task_checked_out(worker_id);
    }

    fn record_task_completed(&self, worker_id: &str, duration: Duration) {
        self.reporter.metrics.record_task_completed(worker_id, duration);
    }

    fn record_task_failed(&self, worker_id: &str, duration: Duration) {
        self.reporter.metrics.record_task_failed(worker_id, duration);
    }

    fn record_checkout_error(&self, worker_id: &str) {
        self.reporter.metrics.record_checkout_error(worker_id);
    }

    fn record_retry_attempt(&self, attempt: u32) {
        self.reporter.metrics.record_retry_attempt(attempt);
    }

    fn record_retry_success(&self, attempts: u32) {
        self.reporter.metrics.record_retry_success(attempts);
    }

    fn record_retry_exhausted(&self, attempts: u32) {
        self.reporter.metrics.record_retry_exhausted(attempts);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.reporter.metrics.snapshot()
    }

    fn start(&self) {
        self.reporter.metrics.start();

        let mut guard = self.token.lock();
        if guard.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    pool = %self.reporter.name,
                    "No tokio runtime available, periodic metrics reports disabled"
                );
                return;
            }
        };

        let token = CancellationToken::new();
        if let Some(period) = self.settings.interval.filter(|period| !period.is_zero()) {
            self.spawn_interval_loop(&handle, token.clone(), period);
        }
        if let Some(threshold) = self.settings.every_tasks.filter(|tasks| *tasks > 0) {
            self.spawn_threshold_loop(&handle, token.clone(), threshold);
        }
        *guard = Some(token);
    }

    fn stop(&self) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }

        if self.settings.on_stop {
            self.reporter.report("final");
        }
    }
}
