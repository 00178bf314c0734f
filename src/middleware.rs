//! Middleware around the per-iteration work function.
//!
//! A worker repeatedly calls one [`WorkFn`]: a single checkout, process and
//! complete-or-fail cycle. Middleware wraps that function to add policies
//! without touching the worker loop. Middleware registered first is the
//! outermost layer: it sees each call first and each result last.
//!
//! # Examples
//!
//! ```rust
//! use smithy_pool::middleware::{middleware_fn, WorkFn, WorkerContext};
//! use futures::FutureExt;
//! use std::sync::Arc;
//!
//! let log_errors = middleware_fn(|next: WorkFn| -> WorkFn {
//!     Arc::new(move |ctx: WorkerContext| {
//!         let next = Arc::clone(&next);
//!         async move {
//!             let result = next(ctx.clone()).await;
//!             if let Err(e) = &result {
//!                 tracing::debug!(worker = %ctx.worker_id(), error = %e, "iteration failed");
//!             }
//!             result
//!         }
//!         .boxed()
//!     })
//! });
//! # let _ = log_errors;
//! ```

use crate::error::{PoolError, PoolResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identity and cancellation handle of the worker running an iteration.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker_id: Arc<str>,
    token: CancellationToken,
}

impl WorkerContext {
    /// Create a context for `worker_id` bound to the pool's token
    pub fn new(worker_id: impl Into<Arc<str>>, token: CancellationToken) -> Self {
        Self {
            worker_id: worker_id.into(),
            token,
        }
    }

    /// Worker identifier, `"<pool-name>-worker-<n>"` inside a pool
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The pool's shared cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Future returned by one work iteration
pub type WorkFuture = BoxFuture<'static, PoolResult<()>>;

/// One work iteration.
///
/// `Ok(())` means a task was found and handled. Errors drive the worker
/// loop: [`PoolError::NoWorkAvailable`] makes it idle, the shutdown signals
/// end it, anything else keeps it polling at the active interval.
pub type WorkFn = Arc<dyn Fn(WorkerContext) -> WorkFuture + Send + Sync>;

/// Transforms one work function into another.
pub trait Middleware: Send + Sync {
    /// Wrap `next`, returning the function workers will call instead
    fn wrap(&self, next: WorkFn) -> WorkFn;
}

/// Middleware built from a closure, see [`middleware_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(WorkFn) -> WorkFn + Send + Sync,
{
    fn wrap(&self, next: WorkFn) -> WorkFn {
        (self.f)(next)
    }
}

/// Adapt a closure into a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(WorkFn) -> WorkFn + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { f })
}

/// Compose `middleware` around `base`, first entry outermost.
pub fn compose(middleware: &[Arc<dyn Middleware>], base: WorkFn) -> WorkFn {
    middleware
        .iter()
        .rev()
        .fold(base, |next, layer| layer.wrap(next))
}

/// Retires a worker after too many consecutive failed iterations.
///
/// Each worker has its own counter. "No work" results leave it untouched, a
/// successful iteration resets it, and any other error increments it. When
/// the count exceeds the threshold the iteration's result is replaced by
/// [`PoolError::WorkerShutdown`], which stops only that worker.
#[derive(Debug, Clone)]
pub struct ConsecutiveErrorShutdown {
    threshold: u32,
    counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl ConsecutiveErrorShutdown {
    /// Shut a worker down once it fails more than `threshold` times in a row
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current consecutive error count for `worker_id`
    pub fn consecutive_errors(&self, worker_id: &str) -> u32 {
        self.counts.lock().get(worker_id).copied().unwrap_or(0)
    }

    fn observe(&self, worker_id: &str, result: PoolResult<()>) -> PoolResult<()> {
        match result {
            Ok(()) => {
                self.counts.lock().remove(worker_id);
                Ok(())
            }
            Err(e) if e.is_no_work() || e.innermost().is_shutdown_signal() => Err(e),
            Err(e) => {
                let count = {
                    let mut counts = self.counts.lock();
                    let count = counts.entry(worker_id.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };

                if count > self.threshold {
                    tracing::warn!(
                        worker = %worker_id,
                        consecutive_errors = count,
                        threshold = self.threshold,
                        error = %e,
                        "🔨 Too many consecutive errors, retiring worker"
                    );
                    self.counts.lock().remove(worker_id);
                    Err(PoolError::worker_shutdown(format!(
                        "{count} consecutive errors, last: {e}"
                    )))
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl Middleware for ConsecutiveErrorShutdown {
    fn wrap(&self, next: WorkFn) -> WorkFn {
        let policy = self.clone();
        Arc::new(move |ctx: WorkerContext| {
            let next = Arc::clone(&next);
            let policy = policy.clone();
            async move {
                let result = next(ctx.clone()).await;
                policy.observe(ctx.worker_id(), result)
            }
            .boxed()
        })
    }
}
