//! Worker loop for pools.
//!
//! Each worker ticks on an adaptive interval and runs one middleware-wrapped
//! work iteration per tick. The outcome of the iteration picks the next
//! state, and the state picks the next interval.

use crate::error::{PoolError, PoolResult};
use crate::metrics::MetricsCollector;
use crate::middleware::{WorkFn, WorkerContext};
use futures::FutureExt;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::sleep;

/// Scheduling state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Nothing to do last time, polling at the idle interval
    Idle,
    /// Found work last time, polling at the active interval
    Active,
    /// Escalating a pool shutdown request before exiting
    ShuttingDown,
    /// Loop has exited
    Terminated,
}

impl WorkerState {
    /// State following an iteration with the given outcome.
    ///
    /// Any real failure keeps the worker active, since it points at an
    /// operational problem worth retrying soon.
    pub fn after(outcome: &PoolResult<()>) -> Self {
        let Err(error) = outcome else {
            return Self::Active;
        };

        match error.innermost() {
            PoolError::NoWorkAvailable => Self::Idle,
            PoolError::WorkerShutdown { .. } | PoolError::Cancelled => Self::Terminated,
            PoolError::PoolShutdown { .. } => Self::ShuttingDown,
            _ => Self::Active,
        }
    }
}

/// Active and idle poll intervals of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Wait after an iteration that found work
    pub active: Duration,
    /// Wait after an iteration that found nothing
    pub idle: Duration,
}

impl PollSchedule {
    /// Create a schedule
    pub fn new(active: Duration, idle: Duration) -> Self {
        Self { active, idle }
    }

    /// Wait before the next iteration, `None` once the worker must stop.
    pub fn interval_for(&self, state: WorkerState) -> Option<Duration> {
        match state {
            WorkerState::Active => Some(self.active),
            WorkerState::Idle => Some(self.idle),
            WorkerState::ShuttingDown | WorkerState::Terminated => None,
        }
    }
}

/// A pool shutdown request raised by a worker.
#[derive(Debug)]
pub struct EscalatedError {
    /// Worker that raised the request
    pub worker_id: String,
    /// The error carrying the request
    pub error: PoolError,
}

/// A single worker loop.
pub struct Worker {
    ctx: WorkerContext,
    work: WorkFn,
    schedule: PollSchedule,
    metrics: Arc<dyn MetricsCollector>,
    escalations: mpsc::Sender<EscalatedError>,
}

impl Worker {
    /// Create a worker that runs `work` until its context is cancelled
    pub fn new(
        ctx: WorkerContext,
        work: WorkFn,
        schedule: PollSchedule,
        metrics: Arc<dyn MetricsCollector>,
        escalations: mpsc::Sender<EscalatedError>,
    ) -> Self {
        Self {
            ctx,
            work,
            schedule,
            metrics,
            escalations,
        }
    }

    /// Worker identifier
    pub fn id(&self) -> &str {
        self.ctx.worker_id()
    }

    /// Run the loop until cancellation or a shutdown signal.
    pub async fn run(self) -> WorkerState {
        let worker_id = self.id().to_string();
        self.metrics.record_worker_started(&worker_id);
        tracing::info!("🔨 Worker {} starting", worker_id);

        let mut state = WorkerState::Active;
        while let Some(delay) = self.schedule.interval_for(state) {
            tokio::select! {
                biased;
                _ = self.ctx.token().cancelled() => {
                    tracing::debug!("🔨 Worker {} observed cancellation", worker_id);
                    break;
                }
                _ = sleep(delay) => {}
            }

            let outcome = self.iterate().await;
            let next = WorkerState::after(&outcome);

            if let Err(error) = outcome {
                match next {
                    WorkerState::ShuttingDown => {
                        tracing::error!(error = %error, "🔨 Worker {} requested pool shutdown", worker_id);
                        self.escalate(error);
                    }
                    WorkerState::Terminated => {
                        tracing::info!(reason = %error, "🔨 Worker {} shutting down", worker_id);
                    }
                    _ if !error.is_no_work() => {
                        tracing::debug!(error = %error, "Worker {} iteration failed", worker_id);
                    }
                    _ => {}
                }
            }

            if next != state {
                tracing::debug!(from = ?state, to = ?next, "Worker {} changed state", worker_id);
            }
            state = next;
        }

        self.metrics.record_worker_stopped(&worker_id);
        tracing::info!("🔨 Worker {} finished", worker_id);
        WorkerState::Terminated
    }

    /// Run one iteration, converting a panic anywhere inside it into an error.
    async fn iterate(&self) -> PoolResult<()> {
        let work = Arc::clone(&self.work);
        let ctx = self.ctx.clone();

        match AssertUnwindSafe(async move { work(ctx).await })
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let error = PoolError::from_panic(payload.as_ref());
                tracing::error!(
                    worker = %self.ctx.worker_id(),
                    error = %error,
                    backtrace = %Backtrace::force_capture(),
                    "🔨 Worker iteration panicked"
                );
                self.metrics.record_worker_panicked(self.ctx.worker_id());
                Err(error)
            }
        }
    }

    fn escalate(&self, error: PoolError) {
        let escalated = EscalatedError {
            worker_id: self.ctx.worker_id().to_string(),
            error,
        };

        match self.escalations.try_send(escalated) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) | Err(TrySendError::Closed(dropped)) => {
                tracing::warn!(
                    worker = %dropped.worker_id,
                    error = %dropped.error,
                    "Escalation channel unavailable, dropping pool shutdown request"
                );
            }
        }
    }
}
