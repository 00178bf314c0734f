//! Pre- and post-process hooks.
//!
//! Hooks run once per checked-out task, around the (possibly retried)
//! `process` call, in the order they were registered. A failing hook is
//! logged and never changes the outcome of the task.

use crate::error::{PoolError, PoolResult};
use crate::middleware::WorkerContext;
use crate::task::Task;
use parking_lot::RwLock;
use std::sync::Arc;

/// Runs before a task is processed
pub type PreProcessHook<T> = Arc<dyn Fn(&WorkerContext, &T) -> PoolResult<()> + Send + Sync>;

/// Runs after a task is processed.
///
/// Receives the processed task on success, or the original task together
/// with the error on failure.
pub type PostProcessHook<T> =
    Arc<dyn Fn(&WorkerContext, &T, Option<&PoolError>) -> PoolResult<()> + Send + Sync>;

/// Ordered hook registry shared by all workers of a pool.
pub struct Hooks<T> {
    pre: RwLock<Vec<PreProcessHook<T>>>,
    post: RwLock<Vec<PostProcessHook<T>>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            pre: RwLock::new(Vec::new()),
            post: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Task> Hooks<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append pre-process hooks.
    pub fn add_pre(&self, hooks: impl IntoIterator<Item = PreProcessHook<T>>) {
        self.pre.write().extend(hooks);
    }

    /// Append post-process hooks.
    pub fn add_post(&self, hooks: impl IntoIterator<Item = PostProcessHook<T>>) {
        self.post.write().extend(hooks);
    }

    /// Number of registered (pre, post) hooks
    pub fn counts(&self) -> (usize, usize) {
        (self.pre.read().len(), self.post.read().len())
    }

    /// Run every pre-process hook for `task`.
    pub fn run_pre(&self, ctx: &WorkerContext, task: &T) {
        let hooks = self.pre.read().clone();
        for (index, hook) in hooks.iter().enumerate() {
            if let Err(e) = hook(ctx, task) {
                tracing::warn!(
                    worker = %ctx.worker_id(),
                    task_id = %task.task_id(),
                    hook = index,
                    error = %e,
                    "Pre-process hook failed"
                );
            }
        }
    }

    /// Run every post-process hook for `task` and the processing outcome.
    pub fn run_post(&self, ctx: &WorkerContext, task: &T, error: Option<&PoolError>) {
        let hooks = self.post.read().clone();
        for (index, hook) in hooks.iter().enumerate() {
            if let Err(e) = hook(ctx, task, error) {
                tracing::warn!(
                    worker = %ctx.worker_id(),
                    task_id = %task.task_id(),
                    hook = index,
                    error = %e,
                    "Post-process hook failed"
                );
            }
        }
    }
}

/// Wrap a closure as a pre-process hook.
pub fn pre_process_hook<T, F>(f: F) -> PreProcessHook<T>
where
    F: Fn(&WorkerContext, &T) -> PoolResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a post-process hook.
pub fn post_process_hook<T, F>(f: F) -> PostProcessHook<T>
where
    F: Fn(&WorkerContext, &T, Option<&PoolError>) -> PoolResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Job(u32);

    impl Task for Job {
        fn task_id(&self) -> String {
            format!("job-{}", self.0)
        }
    }

    #[test]
    fn test_hooks_run_in_registration_order_and_survive_errors() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let hooks = Hooks::<Job>::new();

        let first = Arc::clone(&calls);
        let second = Arc::clone(&calls);
        hooks.add_pre([
            pre_process_hook(move |_, job: &Job| {
                first.lock().push(format!("pre-1:{}", job.0));
                Err(PoolError::hook("first pre hook fails"))
            }),
            pre_process_hook(move |_, job: &Job| {
                second.lock().push(format!("pre-2:{}", job.0));
                Ok(())
            }),
        ]);

        let post = Arc::clone(&calls);
        hooks.add_post([post_process_hook(
            move |_, job: &Job, error: Option<&PoolError>| {
                post.lock()
                    .push(format!("post:{}:{}", job.0, error.is_some()));
                Ok(())
            },
        )]);

        let ctx = WorkerContext::new("pool-worker-1", CancellationToken::new());
        hooks.run_pre(&ctx, &Job(7));
        hooks.run_post(&ctx, &Job(7), Some(&PoolError::processor("failed")));

        assert_eq!(hooks.counts(), (2, 1));
        assert_eq!(
            *calls.lock(),
            vec!["pre-1:7", "pre-2:7", "post:7:true"]
        );
    }
}
