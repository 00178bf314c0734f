//! Error types for pool operations.
//!
//! Besides ordinary failures, [`PoolError`] carries the control signals the
//! worker loop reacts to: [`PoolError::NoWorkAvailable`] switches a worker to
//! its idle interval, [`PoolError::WorkerShutdown`] retires a single worker and
//! [`PoolError::PoolShutdown`] escalates to whoever owns the pool.

use std::any::Any;
use thiserror::Error;

/// Result type used throughout the pool.
pub type PoolResult<T> = Result<T, PoolError>;

/// Main error type for pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The processor has nothing to hand out right now
    #[error("no work available")]
    NoWorkAvailable,

    /// The worker that observed this should exit its loop
    #[error("worker shutdown requested: {reason}")]
    WorkerShutdown {
        /// Why the worker is being retired
        reason: String,
    },

    /// The whole pool should be shut down by its owner
    #[error("pool shutdown requested: {reason}")]
    PoolShutdown {
        /// Why the pool should stop
        reason: String,
    },

    /// The shared cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// A panic was caught and converted into an error
    #[error("panic recovered: {message}")]
    Panicked {
        /// Panic payload rendered as text
        message: String,
    },

    /// Every processing attempt failed
    #[error("task failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the last attempt
        #[source]
        source: Box<PoolError>,
    },

    /// Error reported by the processor implementation
    #[error("processor error: {message}")]
    Processor {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A pre- or post-process hook failed
    #[error("hook error: {message}")]
    Hook {
        /// Error message
        message: String,
    },

    /// `start` was called on a pool that already ran
    #[error("pool has already been started")]
    AlreadyStarted,

    /// Configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },
}

impl PoolError {
    /// Create a processor error from a message
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processor error wrapping an underlying error
    pub fn processor_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Processor {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a hook error
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a worker shutdown signal
    pub fn worker_shutdown(reason: impl Into<String>) -> Self {
        Self::WorkerShutdown {
            reason: reason.into(),
        }
    }

    /// Create a pool shutdown signal
    pub fn pool_shutdown(reason: impl Into<String>) -> Self {
        Self::PoolShutdown {
            reason: reason.into(),
        }
    }

    /// Convert a caught panic payload into an error.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self::Panicked { message }
    }

    /// Whether this is the "nothing to do" signal rather than a failure.
    pub fn is_no_work(&self) -> bool {
        matches!(self, Self::NoWorkAvailable)
    }

    /// Whether this error is a worker or pool shutdown signal.
    pub fn is_shutdown_signal(&self) -> bool {
        matches!(self, Self::WorkerShutdown { .. } | Self::PoolShutdown { .. })
    }

    /// The error beneath any [`PoolError::RetriesExhausted`] wrapping.
    ///
    /// A processor that keeps returning a shutdown signal from `process`
    /// still shuts its worker down once the retries run out.
    pub fn innermost(&self) -> &PoolError {
        let mut current = self;
        while let Self::RetriesExhausted { source, .. } = current {
            current = &**source;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_conversion() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let err = PoolError::from_panic(payload.as_ref());
        assert!(matches!(err, PoolError::Panicked { ref message } if message == "boom"));

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        let err = PoolError::from_panic(payload.as_ref());
        assert_eq!(err.to_string(), "panic recovered: owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        let err = PoolError::from_panic(payload.as_ref());
        assert!(err.to_string().contains("unknown panic payload"));
    }

    #[test]
    fn test_retries_exhausted_names_attempts_and_cause() {
        let err = PoolError::RetriesExhausted {
            attempts: 3,
            source: Box::new(PoolError::processor("database unavailable")),
        };

        assert_eq!(
            err.to_string(),
            "task failed after 3 attempts: processor error: database unavailable"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_signal_predicates() {
        assert!(PoolError::NoWorkAvailable.is_no_work());
        assert!(!PoolError::processor("x").is_no_work());
        assert!(PoolError::worker_shutdown("too many errors").is_shutdown_signal());
        assert!(PoolError::pool_shutdown("fatal").is_shutdown_signal());
        assert!(!PoolError::Cancelled.is_shutdown_signal());
    }

    #[test]
    fn test_innermost_unwraps_retry_exhaustion() {
        let err = PoolError::RetriesExhausted {
            attempts: 2,
            source: Box::new(PoolError::pool_shutdown("disk full")),
        };
        assert!(err.innermost().is_shutdown_signal());
        assert!(matches!(
            PoolError::Cancelled.innermost(),
            PoolError::Cancelled
        ));
    }
}
