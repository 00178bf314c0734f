//! Task identity and the processor contract the pool drives.

use crate::error::{PoolError, PoolResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a task
pub type TaskId = String;

/// Anything the pool can carry from checkout to completion.
///
/// The pool never inspects a task beyond its identifier, which is used to
/// correlate log lines and metrics.
pub trait Task: Send + Sync + 'static {
    /// Stable identifier of this unit of work
    fn task_id(&self) -> TaskId;
}

/// Supplies and disposes of work items for a pool.
///
/// Implementations must be safe to call from many workers at once. The pool
/// relies on `checkout` never handing the same unit of work to two workers
/// simultaneously, and on `process` being safe to call again with the
/// original task when an attempt fails.
#[async_trait]
pub trait Processor<T: Task>: Send + Sync + 'static {
    /// Claim the next task for `worker_id`.
    ///
    /// Return [`PoolError::NoWorkAvailable`] when there is nothing to do; any
    /// other error is counted as a checkout failure.
    async fn checkout(&self, token: &CancellationToken, worker_id: &str) -> PoolResult<T>;

    /// Transform a task. May be called several times for the same task.
    async fn process(&self, token: &CancellationToken, task: &T) -> PoolResult<T>;

    /// Called exactly once for a task that processed successfully.
    async fn complete(
        &self,
        token: &CancellationToken,
        task: &T,
        duration: Duration,
    ) -> PoolResult<()>;

    /// Called exactly once for a task that exhausted its attempts or panicked.
    async fn fail(&self, token: &CancellationToken, task: &T, error: &PoolError)
    -> PoolResult<()>;
}
