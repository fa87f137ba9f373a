//! Worker configuration
//!
//! Everything is read from the environment once at startup. The operating
//! mode follows `QUEUE_ENABLED` and never changes for the process lifetime.

use std::time::Duration;

use flowq_queue::config::{env_opt, env_or, ConfigError, QueueConfig};
use serde::Serialize;
use uuid::Uuid;

/// How the worker finds work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Long-poll the cloud queue
    Queue,
    /// Claim pending executions straight from the database
    Polling,
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMode::Queue => f.write_str("queue"),
            WorkerMode::Polling => f.write_str("polling"),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID
    pub worker_id: String,
    /// Queue transport and consumer settings
    pub queue: QueueConfig,
    /// Polling-mode workers (also the readiness capacity in polling mode)
    pub concurrency: usize,
    /// Per-tenant concurrent execution cap
    pub tenant_max_concurrent: usize,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    /// Workflow engine endpoint
    pub executor_url: Option<String>,
    /// Health server bind address
    pub health_addr: String,
    pub metrics_interval: Duration,
    /// Queue depth above which queue metrics report unhealthy
    pub max_queue_depth: u64,
    /// How long shutdown waits for in-flight executions
    pub shutdown_timeout: Duration,
    /// Stale execution sweep interval
    pub stale_check_interval: Duration,
    /// Age after which a pending or running execution is failed
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            queue: QueueConfig::default(),
            concurrency: 5,
            tenant_max_concurrent: 5,
            redis_url: None,
            database_url: None,
            executor_url: None,
            health_addr: "0.0.0.0:8080".to_string(),
            metrics_interval: Duration::from_secs(30),
            max_queue_depth: 1000,
            shutdown_timeout: Duration::from_secs(30),
            stale_check_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(3600),
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_id: env_opt("WORKER_ID").unwrap_or(defaults.worker_id),
            queue: QueueConfig::from_env(),
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency),
            tenant_max_concurrent: env_or("TENANT_MAX_CONCURRENT", defaults.tenant_max_concurrent),
            redis_url: env_opt("REDIS_URL"),
            database_url: env_opt("DATABASE_URL"),
            executor_url: env_opt("EXECUTOR_URL"),
            health_addr: env_opt("HEALTH_ADDR").unwrap_or(defaults.health_addr),
            metrics_interval: Duration::from_secs(env_or(
                "METRICS_INTERVAL_SECONDS",
                defaults.metrics_interval.as_secs(),
            )),
            max_queue_depth: env_or("MAX_QUEUE_DEPTH", defaults.max_queue_depth),
            ..defaults
        }
    }

    pub fn mode(&self) -> WorkerMode {
        if self.queue.enabled {
            WorkerMode::Queue
        } else {
            WorkerMode::Polling
        }
    }

    /// Concurrent executions this worker runs at most
    pub fn capacity(&self) -> usize {
        match self.mode() {
            WorkerMode::Queue => self.queue.concurrent_workers,
            WorkerMode::Polling => self.concurrency,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.tenant_max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "tenant_max_concurrent must be at least 1".into(),
            ));
        }
        if self.metrics_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "metrics_interval must be at least 1 second".into(),
            ));
        }
        if self.stale_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "stale_check_interval must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_tenant_max_concurrent(mut self, max: usize) -> Self {
        self.tenant_max_concurrent = max;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }
}
