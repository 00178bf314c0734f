//! The worker pool orchestrator.
//!
//! A [`Pool`] owns a processor, spawns a fixed number of worker loops and
//! blocks in [`Pool::start`] until every one of them has exited. Each loop
//! repeatedly runs one work iteration: checkout, retried process bracketed
//! by hooks, then exactly one complete or fail call.

use crate::config::{
    DEFAULT_IDLE_INTERVAL_MS, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RETRY_BASE_DELAY_MS, PoolConfig,
};
use crate::error::{PoolError, PoolResult};
use crate::hooks::{Hooks, PostProcessHook, PreProcessHook};
use crate::metrics::{MetricsCollector, MetricsSnapshot, NoopMetrics};
use crate::middleware::{Middleware, WorkFn, WorkFuture, WorkerContext, compose};
use crate::task::{Processor, Task};
use futures::FutureExt;
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span};
use uuid::Uuid;

pub mod retry;
pub mod worker;

pub use retry::RetryPolicy;
pub use worker::{EscalatedError, PollSchedule, Worker, WorkerState};

/// Everything a work iteration needs, shared by all workers.
struct PoolShared<T: Task> {
    processor: Arc<dyn Processor<T>>,
    metrics: Arc<dyn MetricsCollector>,
    hooks: Hooks<T>,
    retry: RetryPolicy,
}

impl<T: Task> PoolShared<T> {
    /// One checkout, process, complete-or-fail cycle.
    async fn work_once(&self, ctx: &WorkerContext) -> PoolResult<()> {
        let token = ctx.token();
        let worker_id = ctx.worker_id();

        let task = match self.processor.checkout(token, worker_id).await {
            Ok(task) => task,
            Err(e) if e.is_no_work() || e.is_shutdown_signal() => return Err(e),
            Err(PoolError::Cancelled) => return Err(PoolError::Cancelled),
            Err(e) => {
                tracing::warn!(worker = %worker_id, error = %e, "Checkout failed");
                self.metrics.record_checkout_error(worker_id);
                return Err(e);
            }
        };

        let task_id = task.task_id();
        self.metrics.record_task_checked_out(worker_id);
        tracing::debug!(worker = %worker_id, task_id = %task_id, "Task checked out");
        let started = Instant::now();

        // Narrow boundary: a panic in hooks or process still ends in `fail`
        let processed = AssertUnwindSafe(self.process_with_hooks(ctx, &task))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let error = PoolError::from_panic(payload.as_ref());
                tracing::error!(
                    worker = %worker_id,
                    task_id = %task_id,
                    error = %error,
                    backtrace = %Backtrace::force_capture(),
                    "🔨 Task processing panicked"
                );
                self.metrics.record_worker_panicked(worker_id);
                Err(error)
            });
        let duration = started.elapsed();

        match processed {
            Ok(done) => {
                let completed = self.processor.complete(token, &done, duration).await;
                self.metrics.record_task_completed(worker_id, duration);
                match &completed {
                    Ok(()) => tracing::debug!(
                        worker = %worker_id,
                        task_id = %task_id,
                        duration_ms = duration.as_millis() as u64,
                        "Task completed"
                    ),
                    Err(e) => tracing::warn!(
                        worker = %worker_id,
                        task_id = %task_id,
                        error = %e,
                        "Marking task complete failed"
                    ),
                }
                completed
            }
            Err(error) => {
                if let Err(e) = self.processor.fail(token, &task, &error).await {
                    tracing::warn!(
                        worker = %worker_id,
                        task_id = %task_id,
                        error = %e,
                        "Marking task failed returned an error"
                    );
                }
                self.metrics.record_task_failed(worker_id, duration);
                tracing::warn!(worker = %worker_id, task_id = %task_id, error = %error, "Task failed");
                Err(error)
            }
        }
    }

    async fn process_with_hooks(&self, ctx: &WorkerContext, task: &T) -> PoolResult<T> {
        self.hooks.run_pre(ctx, task);

        let processor = &*self.processor;
        let token = ctx.token();
        let result = self
            .retry
            .run(token, &*self.metrics, |_| processor.process(token, task))
            .await;

        match &result {
            Ok(done) => self.hooks.run_post(ctx, done, None),
            Err(e) => self.hooks.run_post(ctx, task, Some(e)),
        }
        result
    }
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    started_at: Option<Instant>,
    token: Option<CancellationToken>,
    escalations: Option<mpsc::Sender<EscalatedError>>,
}

/// A fixed-size pool of workers driving one [`Processor`].
///
/// # Examples
///
/// ```rust,no_run
/// use smithy_pool::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Job(u64);
///
/// impl Task for Job {
///     fn task_id(&self) -> TaskId {
///         self.0.to_string()
///     }
/// }
///
/// struct Doubler;
///
/// #[async_trait]
/// impl Processor<Job> for Doubler {
///     async fn checkout(&self, _: &CancellationToken, _: &str) -> PoolResult<Job> {
///         Err(PoolError::NoWorkAvailable)
///     }
///     async fn process(&self, _: &CancellationToken, job: &Job) -> PoolResult<Job> {
///         Ok(Job(job.0 * 2))
///     }
///     async fn complete(&self, _: &CancellationToken, _: &Job, _: Duration) -> PoolResult<()> {
///         Ok(())
///     }
///     async fn fail(&self, _: &CancellationToken, _: &Job, _: &PoolError) -> PoolResult<()> {
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> PoolResult<()> {
///     let pool = Arc::new(Pool::<Job>::builder("doubler", Arc::new(Doubler)).workers(4).build());
///
///     let stopper = Arc::clone(&pool);
///     tokio::spawn(async move {
///         tokio::signal::ctrl_c().await.ok();
///         stopper.stop();
///     });
///
///     pool.start(&CancellationToken::new()).await
/// }
/// ```
pub struct Pool<T: Task> {
    id: Uuid,
    name: String,
    workers: usize,
    schedule: PollSchedule,
    shared: Arc<PoolShared<T>>,
    middleware: Vec<Arc<dyn Middleware>>,
    span: Option<Span>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    tracker: TaskTracker,
    errors: Mutex<Option<mpsc::Receiver<EscalatedError>>>,
}

impl<T: Task> Pool<T> {
    /// Start configuring a pool
    pub fn builder(name: impl Into<String>, processor: Arc<dyn Processor<T>>) -> PoolBuilder<T> {
        PoolBuilder::new(name, processor)
    }

    /// Create a pool with default settings and `workers` workers
    pub fn new(name: impl Into<String>, workers: usize, processor: Arc<dyn Processor<T>>) -> Self {
        Self::builder(name, processor).workers(workers).build()
    }

    /// Create a pool from a [`PoolConfig`].
    ///
    /// The configuration is normalized first, and its metrics section picks
    /// the collector.
    pub fn from_config(config: &PoolConfig, processor: Arc<dyn Processor<T>>) -> Self {
        let config = config.clone().normalized();
        Self::builder(config.name.clone(), processor)
            .workers(config.num_workers)
            .poll_interval(config.poll_interval())
            .idle_interval(config.idle_interval())
            .max_retries(config.max_retries)
            .retry_base_delay(config.retry_base_delay())
            .metrics(config.metrics.build(&config.name))
            .build()
    }

    /// Unique identifier assigned at construction
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pool name, the prefix of every worker identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers `start` spawns
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Whether `start` is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Time since `start` was called, zero before that
    pub fn uptime(&self) -> Duration {
        self.lifecycle
            .lock()
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Take the receiving end of the escalation channel.
    ///
    /// Workers that hit [`PoolError::PoolShutdown`] push an
    /// [`EscalatedError`] here and exit. The pool does not stop by itself;
    /// the owner decides whether to call [`Pool::stop`]. Returns `None` once
    /// taken. The channel closes when `start` returns.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<EscalatedError>> {
        self.errors.lock().take()
    }

    /// Register hooks run before every task is processed
    pub fn add_pre_process_hooks(&self, hooks: impl IntoIterator<Item = PreProcessHook<T>>) {
        self.shared.hooks.add_pre(hooks);
    }

    /// Register hooks run after every task is processed
    pub fn add_post_process_hooks(&self, hooks: impl IntoIterator<Item = PostProcessHook<T>>) {
        self.shared.hooks.add_post(hooks);
    }

    /// Run the pool until every worker has exited.
    ///
    /// Workers observe a child of `parent`, so cancelling either `parent`
    /// or calling [`Pool::stop`] shuts them down. Returns
    /// [`PoolError::Cancelled`] when `parent` ended the run,
    /// [`PoolError::AlreadyStarted`] if the pool was started before, and
    /// `Ok(())` otherwise. Task failures never surface here.
    pub async fn start(&self, parent: &CancellationToken) -> PoolResult<()> {
        let (token, escalations) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.started {
                return Err(PoolError::AlreadyStarted);
            }
            let escalations = lifecycle
                .escalations
                .take()
                .ok_or(PoolError::AlreadyStarted)?;
            let token = parent.child_token();

            lifecycle.started = true;
            lifecycle.started_at = Some(Instant::now());
            lifecycle.token = Some(token.clone());
            self.running.store(true, Ordering::Release);
            (token, escalations)
        };

        tracing::info!(
            pool_id = %self.id,
            pool = %self.name,
            workers = self.workers,
            "🔨 Starting worker pool"
        );
        self.shared.metrics.start();

        let work = compose(&self.middleware, self.base_work());
        let parent_span = self.span.clone().unwrap_or_else(Span::current);

        for n in 1..=self.workers {
            let worker_id = format!("{}-worker-{}", self.name, n);
            let span = tracing::info_span!(
                parent: &parent_span,
                "worker",
                pool = %self.name,
                worker = %worker_id
            );
            let worker = Worker::new(
                WorkerContext::new(worker_id, token.clone()),
                Arc::clone(&work),
                self.schedule,
                Arc::clone(&self.shared.metrics),
                escalations.clone(),
            );
            self.tracker.spawn(worker.run().instrument(span));
        }

        // Workers hold the only remaining senders
        drop(escalations);
        self.tracker.close();
        self.tracker.wait().await;

        token.cancel();
        self.shared.metrics.stop();
        self.running.store(false, Ordering::Release);

        tracing::info!(
            pool_id = %self.id,
            pool = %self.name,
            uptime_ms = self.uptime().as_millis() as u64,
            "🔨 Worker pool stopped"
        );

        if parent.is_cancelled() {
            Err(PoolError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Ask every worker to exit.
    ///
    /// Does not wait; the pending `start` call returns once the workers are
    /// gone. A no-op when the pool is not running or already stopping.
    pub fn stop(&self) {
        let lifecycle = self.lifecycle.lock();
        if !self.is_running() {
            return;
        }

        if let Some(token) = lifecycle.token.as_ref().filter(|t| !t.is_cancelled()) {
            tracing::info!(pool_id = %self.id, pool = %self.name, "🔨 Stopping worker pool");
            token.cancel();
        }
    }

    fn base_work(&self) -> WorkFn {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |ctx: WorkerContext| -> WorkFuture {
            let shared = Arc::clone(&shared);
            async move { shared.work_once(&ctx).await }.boxed()
        })
    }
}

/// Builder for [`Pool`].
///
/// Zero workers become one, zero intervals or retry delays fall back to
/// their defaults, and zero retries become a single attempt.
pub struct PoolBuilder<T: Task> {
    name: String,
    processor: Arc<dyn Processor<T>>,
    workers: usize,
    poll_interval: Duration,
    idle_interval: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    span: Option<Span>,
    middleware: Vec<Arc<dyn Middleware>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl<T: Task> PoolBuilder<T> {
    fn new(name: impl Into<String>, processor: Arc<dyn Processor<T>>) -> Self {
        Self {
            name: name.into(),
            processor,
            workers: num_cpus::get(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            idle_interval: Duration::from_millis(DEFAULT_IDLE_INTERVAL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            span: None,
            middleware: Vec::new(),
            metrics: None,
        }
    }

    /// Number of concurrent workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Wait between iterations while work is being found
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Wait between iterations while there is nothing to do
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Process attempts per task, including the first
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff before the second attempt, doubling afterwards
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Parent span of every worker span
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Append middleware; the first one added is the outermost
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Metrics collector, no-op by default
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the pool
    pub fn build(self) -> Pool<T> {
        let workers = self.workers.max(1);
        let poll_interval = non_zero_or(self.poll_interval, DEFAULT_POLL_INTERVAL_MS);
        let idle_interval = non_zero_or(self.idle_interval, DEFAULT_IDLE_INTERVAL_MS);
        let retry_base_delay = non_zero_or(self.retry_base_delay, DEFAULT_RETRY_BASE_DELAY_MS);
        let (escalations, errors) = mpsc::channel(workers);

        Pool {
            id: Uuid::new_v4(),
            name: self.name,
            workers,
            schedule: PollSchedule::new(poll_interval, idle_interval),
            shared: Arc::new(PoolShared {
                processor: self.processor,
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
                hooks: Hooks::new(),
                retry: RetryPolicy::new(self.max_retries, retry_base_delay),
            }),
            middleware: self.middleware,
            span: self.span,
            lifecycle: Mutex::new(Lifecycle {
                escalations: Some(escalations),
                ..Default::default()
            }),
            running: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            errors: Mutex::new(Some(errors)),
        }
    }
}

fn non_zero_or(value: Duration, default_ms: u64) -> Duration {
    if value.is_zero() {
        Duration::from_millis(default_ms)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{post_process_hook, pre_process_hook};
    use crate::metrics::InMemoryMetrics;
    use crate::middleware::{ConsecutiveErrorShutdown, middleware_fn};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq)]
    struct Job {
        id: u32,
        worker: String,
        processed: bool,
    }

    impl Task for Job {
        fn task_id(&self) -> String {
            format!("job-{}", self.id)
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        Succeed,
        AlwaysFail,
        FailFirstAttempt,
        Panic,
        FailOnWorker(&'static str),
        BrokenCheckout,
    }

    struct MockProcessor {
        queue: Mutex<VecDeque<Job>>,
        behaviour: Behaviour,
        checkouts: AtomicU32,
        checkout_attempts: Mutex<Vec<Instant>>,
        process_calls: AtomicU32,
        attempts: Mutex<HashMap<u32, u32>>,
        completed: Mutex<Vec<u32>>,
        failed: Mutex<Vec<u32>>,
    }

    impl MockProcessor {
        fn with_jobs(count: u32, behaviour: Behaviour) -> Arc<Self> {
            let queue = (1..=count)
                .map(|id| Job {
                    id,
                    worker: String::new(),
                    processed: false,
                })
                .collect();
            Arc::new(Self {
                queue: Mutex::new(queue),
                behaviour,
                checkouts: AtomicU32::new(0),
                checkout_attempts: Mutex::new(Vec::new()),
                process_calls: AtomicU32::new(0),
                attempts: Mutex::new(HashMap::new()),
                completed: Mutex::new(Vec::new()),
                failed: Mutex::new(Vec::new()),
            })
        }

        fn terminal_calls(&self) -> usize {
            self.completed.lock().len() + self.failed.lock().len()
        }
    }

    #[async_trait]
    impl Processor<Job> for MockProcessor {
        async fn checkout(&self, _token: &CancellationToken, worker_id: &str) -> PoolResult<Job> {
            self.checkout_attempts.lock().push(Instant::now());
            if let Behaviour::BrokenCheckout = self.behaviour {
                return Err(PoolError::processor("queue unreachable"));
            }
            let mut job = self
                .queue
                .lock()
                .pop_front()
                .ok_or(PoolError::NoWorkAvailable)?;
            self.checkouts.fetch_add(1, Ordering::SeqCst);
            job.worker = worker_id.to_string();
            Ok(job)
        }

        async fn process(&self, _token: &CancellationToken, task: &Job) -> PoolResult<Job> {
            self.process_calls.fetch_add(1, Ordering::SeqCst);
            let attempt = {
                let mut attempts = self.attempts.lock();
                let attempt = attempts.entry(task.id).or_insert(0);
                *attempt += 1;
                *attempt
            };
            let done = Job {
                processed: true,
                ..task.clone()
            };

            match self.behaviour {
                Behaviour::Succeed => Ok(done),
                Behaviour::AlwaysFail => Err(PoolError::processor("always failing")),
                Behaviour::FailFirstAttempt if attempt == 1 => {
                    Err(PoolError::processor("first attempt fails"))
                }
                Behaviour::FailFirstAttempt => Ok(done),
                Behaviour::Panic => panic!("processing job {} panicked", task.id),
                Behaviour::FailOnWorker(worker) if task.worker == worker => {
                    Err(PoolError::processor("bad worker"))
                }
                Behaviour::FailOnWorker(_) => Ok(done),
                Behaviour::BrokenCheckout => unreachable!("checkout never succeeds"),
            }
        }

        async fn complete(
            &self,
            _token: &CancellationToken,
            task: &Job,
            _duration: Duration,
        ) -> PoolResult<()> {
            assert!(task.processed);
            self.completed.lock().push(task.id);
            Ok(())
        }

        async fn fail(
            &self,
            _token: &CancellationToken,
            task: &Job,
            _error: &PoolError,
        ) -> PoolResult<()> {
            self.failed.lock().push(task.id);
            Ok(())
        }
    }

    fn test_pool(processor: &Arc<MockProcessor>, workers: usize) -> PoolBuilder<Job> {
        Pool::builder("pool", processor.clone() as Arc<dyn Processor<Job>>)
            .workers(workers)
            .poll_interval(Duration::from_millis(5))
            .idle_interval(Duration::from_millis(20))
            .retry_base_delay(Duration::from_millis(10))
    }

    /// Start `pool`, wait for `done`, then stop it and return what `start` returned.
    async fn run_until(pool: Arc<Pool<Job>>, done: impl Fn() -> bool) -> PoolResult<()> {
        let runner = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.start(&CancellationToken::new()).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
        while !done() && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
        }

        pool.stop();
        runner.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_workers_drain_five_tasks() {
        let processor = MockProcessor::with_jobs(5, Behaviour::Succeed);
        let metrics = Arc::new(InMemoryMetrics::new());
        let pool = Arc::new(
            test_pool(&processor, 2)
                .max_retries(1)
                .metrics(metrics.clone())
                .build(),
        );

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 5)
            .await
            .unwrap();

        assert_eq!(processor.completed.lock().len(), 5);
        assert!(processor.failed.lock().is_empty());

        let snapshot = pool.metrics();
        assert_eq!(snapshot.workers_started, 2);
        assert_eq!(snapshot.workers_stopped, 2);
        assert_eq!(snapshot.tasks_checked_out, 5);
        assert_eq!(snapshot.tasks_completed, 5);
        assert_eq!(snapshot.tasks_in_progress, 0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert!(!pool.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_is_attempted_max_retries_times() {
        let processor = MockProcessor::with_jobs(1, Behaviour::AlwaysFail);
        let metrics = Arc::new(InMemoryMetrics::new());
        let pool = Arc::new(test_pool(&processor, 1).max_retries(4).metrics(metrics).build());

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 1)
            .await
            .unwrap();

        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 4);
        assert_eq!(*processor.failed.lock(), vec![1]);
        assert!(processor.completed.lock().is_empty());

        let snapshot = pool.metrics();
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.retry_attempts, 3);
        assert_eq!(snapshot.retries_exhausted, 1);
        assert_eq!(snapshot.error_rate, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_succeeds_on_retry() {
        let processor = MockProcessor::with_jobs(1, Behaviour::FailFirstAttempt);
        let metrics = Arc::new(InMemoryMetrics::new());
        let pool = Arc::new(test_pool(&processor, 1).max_retries(3).metrics(metrics).build());

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 1)
            .await
            .unwrap();

        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*processor.completed.lock(), vec![1]);
        assert!(processor.failed.lock().is_empty());
        assert_eq!(pool.metrics().retry_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_process_still_fails_each_task_once() {
        let processor = MockProcessor::with_jobs(3, Behaviour::Panic);
        let metrics = Arc::new(InMemoryMetrics::new());
        let pool = Arc::new(test_pool(&processor, 2).max_retries(3).metrics(metrics).build());

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 3)
            .await
            .unwrap();

        let mut failed = processor.failed.lock().clone();
        failed.sort_unstable();
        assert_eq!(failed, vec![1, 2, 3]);
        assert!(processor.completed.lock().is_empty());
        // A panic is not retried
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 3);

        let snapshot = pool.metrics();
        assert_eq!(snapshot.worker_panics, 3);
        assert_eq!(snapshot.tasks_failed, 3);
        assert_eq!(snapshot.workers_stopped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_errors_are_counted_and_keep_worker_active() {
        let processor = MockProcessor::with_jobs(3, Behaviour::BrokenCheckout);
        let pool = test_pool(&processor, 1)
            .poll_interval(Duration::from_millis(10))
            .idle_interval(Duration::from_secs(1))
            .metrics(Arc::new(InMemoryMetrics::new()))
            .build();

        let parent = CancellationToken::new();
        let canceller = parent.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(105)).await;
            canceller.cancel();
        });
        assert!(matches!(pool.start(&parent).await, Err(PoolError::Cancelled)));

        let attempts = processor.checkout_attempts.lock().clone();
        assert!(attempts.len() >= 5, "only {} checkouts", attempts.len());
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(10) && gap < Duration::from_millis(100));
        }

        let snapshot = pool.metrics();
        assert_eq!(snapshot.checkout_errors, attempts.len() as u64);
        assert_eq!(snapshot.tasks_checked_out, 0);
        assert_eq!(processor.terminal_calls(), 0);
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_post_hook_fails_each_task_once() {
        let processor = MockProcessor::with_jobs(2, Behaviour::Succeed);
        let pool = Arc::new(
            test_pool(&processor, 1)
                .max_retries(1)
                .metrics(Arc::new(InMemoryMetrics::new()))
                .build(),
        );
        pool.add_post_process_hooks([post_process_hook(
            |_: &WorkerContext, job: &Job, _: Option<&PoolError>| -> PoolResult<()> {
                panic!("post hook exploded on job {}", job.id)
            },
        )]);

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 2)
            .await
            .unwrap();

        let mut failed = processor.failed.lock().clone();
        failed.sort_unstable();
        assert_eq!(failed, vec![1, 2]);
        assert!(processor.completed.lock().is_empty());
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 2);

        let snapshot = pool.metrics();
        assert_eq!(snapshot.worker_panics, 2);
        assert_eq!(snapshot.tasks_failed, 2);
        assert_eq!(snapshot.tasks_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_pre_hook_fails_without_processing() {
        let processor = MockProcessor::with_jobs(2, Behaviour::Succeed);
        let pool = Arc::new(
            test_pool(&processor, 2)
                .max_retries(3)
                .metrics(Arc::new(InMemoryMetrics::new()))
                .build(),
        );
        pool.add_pre_process_hooks([pre_process_hook(
            |_: &WorkerContext, job: &Job| -> PoolResult<()> {
                panic!("pre hook exploded on job {}", job.id)
            },
        )]);

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 2)
            .await
            .unwrap();

        assert_eq!(processor.failed.lock().len(), 2);
        assert!(processor.completed.lock().is_empty());
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 0);

        let snapshot = pool.metrics();
        assert_eq!(snapshot.worker_panics, 2);
        assert_eq!(snapshot.tasks_failed, 2);
        assert_eq!(snapshot.workers_stopped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_see_original_and_processed_task() {
        let processor = MockProcessor::with_jobs(1, Behaviour::Succeed);
        let pool = Arc::new(test_pool(&processor, 1).max_retries(1).build());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let pre = Arc::clone(&seen);
        let post = Arc::clone(&seen);
        pool.add_pre_process_hooks([pre_process_hook(move |ctx: &WorkerContext, job: &Job| {
            pre.lock()
                .push(format!("pre:{}:{}", ctx.worker_id(), job.processed));
            Ok(())
        })]);
        pool.add_post_process_hooks([post_process_hook(
            move |_: &WorkerContext, job: &Job, error: Option<&PoolError>| {
                post.lock()
                    .push(format!("post:{}:{}", job.processed, error.is_some()));
                Err(PoolError::hook("ignored"))
            },
        )]);

        let watched = processor.clone();
        run_until(pool, move || watched.terminal_calls() == 1)
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec!["pre:pool-worker-1:false", "post:true:false"]
        );
        assert_eq!(*processor.completed.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_hook_receives_original_task_on_failure() {
        let processor = MockProcessor::with_jobs(1, Behaviour::AlwaysFail);
        let pool = Arc::new(test_pool(&processor, 1).max_retries(2).build());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let post = Arc::clone(&seen);
        pool.add_post_process_hooks([post_process_hook(
            move |_: &WorkerContext, job: &Job, error: Option<&PoolError>| {
                let exhausted = matches!(error, Some(PoolError::RetriesExhausted { attempts: 2, .. }));
                post.lock().push((job.processed, exhausted));
                Ok(())
            },
        )]);

        let watched = processor.clone();
        run_until(pool, move || watched.terminal_calls() == 1)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![(false, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_errors_retire_only_the_failing_worker() {
        let processor = MockProcessor::with_jobs(40, Behaviour::FailOnWorker("pool-worker-1"));
        let metrics = Arc::new(InMemoryMetrics::new());
        let policy = ConsecutiveErrorShutdown::new(3);
        let pool = Arc::new(
            test_pool(&processor, 2)
                .max_retries(1)
                .middleware(Arc::new(policy))
                .metrics(metrics.clone())
                .build(),
        );

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() == 40)
            .await
            .unwrap();

        assert_eq!(processor.failed.lock().len(), 4);
        assert_eq!(processor.completed.lock().len(), 36);
        let snapshot = pool.metrics();
        assert_eq!(snapshot.tasks_failed, 4);
        assert_eq!(snapshot.tasks_completed, 36);
        assert_eq!(snapshot.workers_stopped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_returns_when_every_worker_retires() {
        let processor = MockProcessor::with_jobs(100, Behaviour::AlwaysFail);
        let pool = test_pool(&processor, 2)
            .max_retries(1)
            .middleware(Arc::new(ConsecutiveErrorShutdown::new(3)))
            .metrics(Arc::new(InMemoryMetrics::new()))
            .build();

        pool.start(&CancellationToken::new()).await.unwrap();

        assert_eq!(processor.failed.lock().len(), 8);
        assert_eq!(pool.metrics().workers_stopped, 2);
        assert_eq!(processor.queue.lock().len(), 92);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_shutdown_requests_are_escalated() {
        let processor = MockProcessor::with_jobs(0, Behaviour::Succeed);
        let escalate = middleware_fn(|_next: WorkFn| -> WorkFn {
            Arc::new(|_: WorkerContext| -> WorkFuture {
                async { Err(PoolError::pool_shutdown("lost connection")) }.boxed()
            })
        });
        let pool = test_pool(&processor, 2).middleware(escalate).build();
        let mut errors = pool.take_errors().unwrap();
        assert!(pool.take_errors().is_none());

        pool.start(&CancellationToken::new()).await.unwrap();

        let mut workers = Vec::new();
        while let Some(escalated) = errors.recv().await {
            assert!(matches!(escalated.error, PoolError::PoolShutdown { .. }));
            workers.push(escalated.worker_id);
        }
        workers.sort();
        assert_eq!(workers, vec!["pool-worker-1", "pool-worker-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_checkouts_after_stop() {
        let processor = MockProcessor::with_jobs(1000, Behaviour::Succeed);
        let pool = Arc::new(test_pool(&processor, 3).max_retries(1).build());

        let watched = processor.clone();
        run_until(pool.clone(), move || watched.terminal_calls() >= 10)
            .await
            .unwrap();

        let checkouts = processor.checkouts.load(Ordering::SeqCst);
        assert_eq!(processor.terminal_calls() as u32, checkouts);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(processor.checkouts.load(Ordering::SeqCst), checkouts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_idempotent_stop() {
        let processor = MockProcessor::with_jobs(0, Behaviour::Succeed);
        let pool = Arc::new(test_pool(&processor, 1).build());

        // Stopping a pool that never started does nothing
        pool.stop();
        assert!(!pool.is_running());

        let runner = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.start(&CancellationToken::new()).await })
        };
        sleep(Duration::from_millis(50)).await;
        assert!(pool.is_running());
        assert!(pool.uptime() >= Duration::from_millis(50));

        let second = pool.start(&CancellationToken::new()).await;
        assert!(matches!(second, Err(PoolError::AlreadyStarted)));

        pool.stop();
        pool.stop();
        runner.await.unwrap().unwrap();
        pool.stop();

        assert!(!pool.is_running());
        assert!(matches!(
            pool.start(&CancellationToken::new()).await,
            Err(PoolError::AlreadyStarted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_is_returned() {
        let processor = MockProcessor::with_jobs(0, Behaviour::Succeed);
        let pool = test_pool(&processor, 2).build();
        let parent = CancellationToken::new();

        let canceller = parent.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = pool.start(&parent).await;
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }

    #[test]
    fn test_builder_coerces_invalid_settings() {
        let processor = MockProcessor::with_jobs(0, Behaviour::Succeed);
        let pool = Pool::builder("coerced", processor as Arc<dyn Processor<Job>>)
            .workers(0)
            .poll_interval(Duration::ZERO)
            .idle_interval(Duration::ZERO)
            .max_retries(0)
            .build();

        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.schedule.active, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        assert_eq!(pool.schedule.idle, Duration::from_millis(DEFAULT_IDLE_INTERVAL_MS));
        assert_eq!(pool.shared.retry.max_attempts(), 1);
        assert_eq!(pool.metrics(), MetricsSnapshot::default());
        assert_eq!(pool.uptime(), Duration::ZERO);
    }

    #[test]
    fn test_from_config_uses_configured_collector() {
        let processor = MockProcessor::with_jobs(0, Behaviour::Succeed);
        let config = PoolConfig::testing();
        let pool = Pool::from_config(&config, processor as Arc<dyn Processor<Job>>);

        assert_eq!(pool.name(), config.name);
        assert_eq!(pool.worker_count(), config.num_workers);
        assert_eq!(pool.shared.retry.max_attempts(), config.max_retries);

        pool.shared.metrics.record_task_checked_out("w");
        assert_eq!(pool.metrics().tasks_checked_out, 1);
    }
}
