//! # Smithy Pool
//!
//! A generic async worker pool for Rust applications.
//!
//! A [`Pool`] drives any checkout, process, complete-or-fail workload across
//! a fixed number of tokio workers. You supply a [`Processor`] that knows
//! where tasks come from and what to do with them; the pool takes care of
//! scheduling, retries and fault isolation.
//!
//! ## Features
//!
//! - **Adaptive Polling**: Workers tick fast while work is found and back off when idle
//! - **Bounded Retries**: Exponential backoff between attempts, cancellation aware
//! - **Panic Isolation**: A panicking task is marked failed, its worker keeps going
//! - **Middleware and Hooks**: Wrap every iteration or bracket every task
//! - **Graceful Shutdown**: `stop()` then wait for `start()` to return
//! - **Observability**: Structured `tracing` logs and pluggable metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smithy_pool::prelude::*;
//! use std::collections::VecDeque;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Email {
//!     id: u64,
//!     to: String,
//! }
//!
//! impl Task for Email {
//!     fn task_id(&self) -> TaskId {
//!         self.id.to_string()
//!     }
//! }
//!
//! struct Outbox {
//!     pending: parking_lot::Mutex<VecDeque<Email>>,
//! }
//!
//! #[async_trait]
//! impl Processor<Email> for Outbox {
//!     async fn checkout(&self, _: &CancellationToken, _: &str) -> PoolResult<Email> {
//!         self.pending.lock().pop_front().ok_or(PoolError::NoWorkAvailable)
//!     }
//!
//!     async fn process(&self, _: &CancellationToken, email: &Email) -> PoolResult<Email> {
//!         // Send the email here
//!         Ok(Email { id: email.id, to: email.to.clone() })
//!     }
//!
//!     async fn complete(&self, _: &CancellationToken, _: &Email, _: Duration) -> PoolResult<()> {
//!         Ok(())
//!     }
//!
//!     async fn fail(&self, _: &CancellationToken, _: &Email, _: &PoolError) -> PoolResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> PoolResult<()> {
//!     let config = PoolConfig::development();
//!     config.logging.init()?;
//!
//!     let outbox = Arc::new(Outbox { pending: Default::default() });
//!     let pool = Pool::<Email>::from_config(&config, outbox);
//!
//!     pool.start(&CancellationToken::new()).await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod middleware;
pub mod task;

pub mod prelude {
    pub use crate::config::{LogLevel, LoggingConfig, MetricsBackend, MetricsConfig, PoolConfig};
    pub use crate::core::{EscalatedError, Pool, PoolBuilder, RetryPolicy, WorkerState};
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::hooks::{PostProcessHook, PreProcessHook, post_process_hook, pre_process_hook};
    pub use crate::metrics::{InMemoryMetrics, LoggingMetrics, MetricsCollector, MetricsSnapshot};
    pub use crate::middleware::{
        ConsecutiveErrorShutdown, Middleware, WorkFn, WorkFuture, WorkerContext, middleware_fn,
    };
    pub use crate::task::{Processor, Task, TaskId};
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}

pub use crate::config::PoolConfig;
pub use crate::core::{Pool, PoolBuilder};
pub use crate::error::{PoolError, PoolResult};
pub use crate::task::{Processor, Task, TaskId};
pub use async_trait::async_trait;
