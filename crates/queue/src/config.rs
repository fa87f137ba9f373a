//! Queue configuration
//!
//! Loaded from environment variables with defaults for every setting.
//! Receive parameters are clamped into the legal range instead of rejected.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::transport::{clamp_max_messages, clamp_wait_seconds};

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Queue mode enabled without a queue address
    #[error("QUEUE_URL is required when the queue is enabled")]
    MissingQueueUrl,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Queue consumer and transport configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Queue mode on/off (off selects database polling)
    pub enabled: bool,
    /// Endpoint override, e.g. a local emulator
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Main queue address
    pub queue_url: String,
    /// Dead-letter queue address
    pub dlq_url: Option<String>,
    /// Messages per receive call (1-10)
    pub max_messages: i32,
    /// Long-poll wait (0-20 seconds)
    pub wait_time_seconds: i32,
    /// Visibility timeout applied by the queue, in seconds
    pub visibility_timeout: i32,
    /// Native redeliveries before the queue moves a message to the DLQ
    pub max_retries: u32,
    /// Per-message processing deadline
    pub process_timeout: Duration,
    /// Pause between polls when idle or after errors
    pub poll_interval: Duration,
    /// Concurrent processing slots
    pub concurrent_workers: usize,
    /// Delete messages after successful processing
    pub delete_after_process: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            queue_url: String::new(),
            dlq_url: None,
            max_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout: 300,
            max_retries: 3,
            process_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            concurrent_workers: 5,
            delete_after_process: true,
        }
    }
}

impl QueueConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `QUEUE_ENABLED`: "true" to consume from the queue
    /// - `QUEUE_ENDPOINT`: Endpoint override (local emulator)
    /// - `QUEUE_REGION` or `AWS_REGION`: Region (default: "us-east-1")
    /// - `QUEUE_ACCESS_KEY_ID` / `QUEUE_SECRET_ACCESS_KEY`: Static credentials
    /// - `QUEUE_URL` / `QUEUE_DLQ_URL`: Queue addresses
    /// - `QUEUE_MAX_MESSAGES`, `QUEUE_WAIT_TIME_SECONDS`, `QUEUE_VISIBILITY_TIMEOUT`,
    ///   `QUEUE_MAX_RETRIES`, `QUEUE_PROCESS_TIMEOUT`, `QUEUE_POLL_INTERVAL`,
    ///   `QUEUE_CONCURRENT_WORKERS`, `QUEUE_DELETE_AFTER_PROCESS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("QUEUE_ENABLED", defaults.enabled),
            endpoint: env_opt("QUEUE_ENDPOINT"),
            region: env_opt("QUEUE_REGION")
                .or_else(|| env_opt("AWS_REGION"))
                .unwrap_or(defaults.region),
            access_key_id: env_opt("QUEUE_ACCESS_KEY_ID"),
            secret_access_key: env_opt("QUEUE_SECRET_ACCESS_KEY"),
            queue_url: env_opt("QUEUE_URL").unwrap_or_default(),
            dlq_url: env_opt("QUEUE_DLQ_URL"),
            max_messages: clamp_max_messages(env_or("QUEUE_MAX_MESSAGES", defaults.max_messages)),
            wait_time_seconds: clamp_wait_seconds(env_or(
                "QUEUE_WAIT_TIME_SECONDS",
                defaults.wait_time_seconds,
            )),
            visibility_timeout: env_or("QUEUE_VISIBILITY_TIMEOUT", defaults.visibility_timeout),
            max_retries: env_or("QUEUE_MAX_RETRIES", defaults.max_retries),
            process_timeout: Duration::from_secs(env_or(
                "QUEUE_PROCESS_TIMEOUT",
                defaults.process_timeout.as_secs(),
            )),
            poll_interval: Duration::from_secs(env_or(
                "QUEUE_POLL_INTERVAL",
                defaults.poll_interval.as_secs(),
            )),
            concurrent_workers: env_or("QUEUE_CONCURRENT_WORKERS", defaults.concurrent_workers),
            delete_after_process: env_flag(
                "QUEUE_DELETE_AFTER_PROCESS",
                defaults.delete_after_process,
            ),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.queue_url.trim().is_empty() {
            return Err(ConfigError::MissingQueueUrl);
        }
        if self.concurrent_workers == 0 {
            return Err(ConfigError::Invalid(
                "concurrent_workers must be at least 1".into(),
            ));
        }
        if self.process_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "process_timeout must be greater than zero".into(),
            ));
        }
        if self.visibility_timeout <= 0 {
            return Err(ConfigError::Invalid(
                "visibility_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Enable queue mode for the given queue address
    pub fn with_queue_url(mut self, url: impl Into<String>) -> Self {
        self.queue_url = url.into();
        self.enabled = true;
        self
    }

    pub fn with_dlq_url(mut self, url: impl Into<String>) -> Self {
        self.dlq_url = Some(url.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set messages per receive (clamped to 1-10)
    pub fn with_max_messages(mut self, max: i32) -> Self {
        self.max_messages = clamp_max_messages(max);
        self
    }

    /// Set long-poll wait (clamped to 0-20 seconds)
    pub fn with_wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = clamp_wait_seconds(seconds);
        self
    }

    pub fn with_visibility_timeout(mut self, seconds: i32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set concurrent processing slots (minimum 1)
    pub fn with_concurrent_workers(mut self, workers: usize) -> Self {
        self.concurrent_workers = workers.max(1);
        self
    }

    pub fn with_delete_after_process(mut self, delete: bool) -> Self {
        self.delete_after_process = delete;
        self
    }
}

/// Read a variable, treating empty values as unset
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable, falling back to `default` when unset or unparsable
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag ("true"/"1"/"yes" or "false"/"0"/"no")
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => true,
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => false,
        _ => default,
    }
}
