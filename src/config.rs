//! Configuration types for worker pools.
//!
//! This module contains the serializable pool settings, the metrics backend
//! selection and the logging setup used by applications embedding a pool.

use crate::error::{PoolError, PoolResult};
use crate::metrics::{InMemoryMetrics, LoggingMetrics, MetricsCollector, NoopMetrics, ReportSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default active poll interval (in milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// Default idle poll interval (in milliseconds)
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 5000;
/// Default number of processing attempts per task
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay between processing attempts (in milliseconds)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Main configuration for a worker pool.
///
/// # Examples
///
/// ```rust
/// use smithy_pool::config::PoolConfig;
///
/// let config = PoolConfig::new("emails")
///     .with_workers(8)
///     .with_max_retries(5);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool identity used in worker names, logs and metrics
    pub name: String,

    /// Number of workers to spawn
    pub num_workers: usize,

    /// Poll interval after a worker found work (in milliseconds)
    pub poll_interval_ms: u64,

    /// Poll interval after a worker found nothing to do (in milliseconds)
    pub idle_interval_ms: u64,

    /// Processing attempts per task
    pub max_retries: u32,

    /// Delay before the second attempt, doubled for each further attempt (in milliseconds)
    pub retry_base_delay_ms: u64,

    /// Metrics collection configuration
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            num_workers: num_cpus::get().max(1),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle_interval_ms: DEFAULT_IDLE_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a default configuration for the named pool.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> PoolResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| PoolError::config(format!("invalid pool configuration: {e}")))
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the active poll interval.
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set the idle poll interval.
    pub fn with_idle_interval(mut self, interval_ms: u64) -> Self {
        self.idle_interval_ms = interval_ms;
        self
    }

    /// Set the number of processing attempts per task.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_base_delay(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Set the metrics configuration.
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace out-of-range values with usable ones.
    ///
    /// Zero workers become one worker, zero retries become a single attempt
    /// and zero intervals or delays fall back to their defaults.
    pub fn normalized(mut self) -> Self {
        self.num_workers = self.num_workers.max(1);
        self.max_retries = self.max_retries.max(1);
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.idle_interval_ms == 0 {
            self.idle_interval_ms = DEFAULT_IDLE_INTERVAL_MS;
        }
        if self.retry_base_delay_ms == 0 {
            self.retry_base_delay_ms = DEFAULT_RETRY_BASE_DELAY_MS;
        }
        self
    }

    /// Active poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Idle poll interval as a duration
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Base retry delay as a duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Create a configuration optimized for development.
    pub fn development() -> Self {
        Self {
            num_workers: 2,
            poll_interval_ms: 50,
            idle_interval_ms: 1000,
            metrics: MetricsConfig {
                backend: MetricsBackend::Logging,
                report_interval_secs: Some(30),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration optimized for production.
    pub fn production() -> Self {
        Self {
            num_workers: num_cpus::get() * 2,
            max_retries: 5,
            metrics: MetricsConfig {
                backend: MetricsBackend::Logging,
                report_interval_secs: Some(60),
                report_every_tasks: Some(10_000),
                report_on_stop: true,
            },
            logging: LoggingConfig {
                level: LogLevel::Info,
                colored: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            num_workers: 1,
            poll_interval_ms: 5,
            idle_interval_ms: 20,
            max_retries: 1,
            retry_base_delay_ms: 5,
            metrics: MetricsConfig {
                backend: MetricsBackend::InMemory,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_timestamps: false,
                include_targets: true,
            },
            ..Default::default()
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Pool name must not be empty".to_string());
        }

        if self.num_workers == 0 {
            errors.push("Number of workers must be greater than 0".to_string());
        }

        if self.num_workers > 1000 {
            errors.push("Number of workers should not exceed 1000".to_string());
        }

        if self.max_retries == 0 {
            errors.push("Max retries must be at least 1".to_string());
        }

        if self.poll_interval_ms == 0 || self.idle_interval_ms == 0 {
            errors.push("Poll intervals must be greater than 0".to_string());
        }

        if self.idle_interval_ms < self.poll_interval_ms {
            errors.push("Idle interval must not be shorter than the poll interval".to_string());
        }

        if self.metrics.backend != MetricsBackend::Logging
            && (self.metrics.report_interval_secs.is_some()
                || self.metrics.report_every_tasks.is_some())
        {
            errors.push("Metrics reports require the logging metrics backend".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Which metrics collector a pool uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsBackend {
    /// Discard all metrics
    #[default]
    Noop,
    /// Keep counters in memory
    InMemory,
    /// Keep counters in memory and log periodic reports
    Logging,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Collector backend
    pub backend: MetricsBackend,

    /// Interval between periodic reports (in seconds)
    pub report_interval_secs: Option<u64>,

    /// Report whenever this many tasks finished since the last report
    pub report_every_tasks: Option<u64>,

    /// Emit a final report when the pool stops
    pub report_on_stop: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            backend: MetricsBackend::Noop,
            report_interval_secs: None,
            report_every_tasks: None,
            report_on_stop: true,
        }
    }
}

impl MetricsConfig {
    /// Build the configured collector for the named pool.
    pub fn build(&self, pool_name: &str) -> Arc<dyn MetricsCollector> {
        match self.backend {
            MetricsBackend::Noop => Arc::new(NoopMetrics),
            MetricsBackend::InMemory => Arc::new(InMemoryMetrics::new()),
            MetricsBackend::Logging => {
                let settings = ReportSettings {
                    interval: self.report_interval_secs.map(Duration::from_secs),
                    every_tasks: self.report_every_tasks,
                    on_stop: self.report_on_stop,
                    ..Default::default()
                };
                Arc::new(LoggingMetrics::new(pool_name, settings))
            }
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable colored output
    pub colored: bool,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            colored: true,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber built from this configuration.
    ///
    /// Fails if a global subscriber is already installed.
    pub fn init(&self) -> PoolResult<()> {
        let builder = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::from(self.level))
            .with_ansi(self.colored)
            .with_target(self.include_targets);

        let result = if self.include_timestamps {
            builder.try_init()
        } else {
            builder.without_time().try_init()
        };

        result.map_err(|e| PoolError::config(format!("failed to install tracing subscriber: {e}")))
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.idle_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        assert!(PoolConfig::development().validate().is_ok());
        assert!(PoolConfig::production().validate().is_ok());

        let testing = PoolConfig::testing();
        assert_eq!(testing.num_workers, 1);
        assert_eq!(testing.metrics.backend, MetricsBackend::InMemory);
        assert!(testing.validate().is_ok());
    }

    #[test]
    fn test_normalized_coerces_zero_values() {
        let config = PoolConfig::new("orders")
            .with_workers(0)
            .with_poll_interval(0)
            .with_idle_interval(0)
            .with_max_retries(0)
            .with_retry_base_delay(0)
            .normalized();

        assert_eq!(config.num_workers, 1);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.idle_interval_ms, DEFAULT_IDLE_INTERVAL_MS);
        assert_eq!(config.retry_base_delay_ms, DEFAULT_RETRY_BASE_DELAY_MS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PoolConfig::new("orders");
        assert!(config.validate().is_ok());

        config.num_workers = 0;
        config.name = " ".to_string();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("workers")));

        let config = PoolConfig::new("orders")
            .with_poll_interval(500)
            .with_idle_interval(100);
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Idle interval")));

        let config = PoolConfig::new("orders").with_metrics(MetricsConfig {
            report_interval_secs: Some(10),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = PoolConfig::from_json(
            r#"{
                "name": "emails",
                "num_workers": 4,
                "metrics": { "backend": "logging", "report_every_tasks": 100 },
                "logging": { "level": "warn" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "emails");
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.metrics.backend, MetricsBackend::Logging);
        assert_eq!(config.metrics.report_every_tasks, Some(100));
        assert!(config.metrics.report_on_stop);
        assert_eq!(config.logging.level, LogLevel::Warn);

        let err = PoolConfig::from_json("{ \"num_workers\": \"many\" }").unwrap_err();
        assert!(matches!(err, PoolError::Config { .. }));
    }

    #[test]
    fn test_metrics_backend_build() {
        let noop = MetricsConfig::default().build("p");
        noop.record_task_checked_out("w");
        assert_eq!(noop.snapshot().tasks_checked_out, 0);

        let memory = MetricsConfig {
            backend: MetricsBackend::InMemory,
            ..Default::default()
        }
        .build("p");
        memory.record_task_checked_out("w");
        assert_eq!(memory.snapshot().tasks_checked_out, 1);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
    }
}
