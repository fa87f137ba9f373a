//! Execution worker
//!
//! Consumes execution messages from the queue (or claims pending executions
//! from the store when the queue is disabled), admits them through the
//! per-tenant concurrency limiter and hands them to the executor.
//!
//! ```text
//! QueueTransport ─► QueueConsumer ─┐
//!                                  ├─► ExecutionHandler ─► TenantLimiter ─► Executor
//! Repository ─────► PollingConsumer┘
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod handler;
pub mod health;
pub mod limiter;
pub mod stats;
pub mod watchdog;
pub mod worker;

pub use config::{WorkerConfig, WorkerMode};
pub use consumer::{Consumer, PollingConsumer, QueueConsumer, SlotState};
pub use error::WorkerError;
pub use executor::HttpExecutor;
pub use handler::{ExecutionHandler, HandlerError, ProcessOutcome};
pub use health::{DependencyCheck, HealthState};
pub use limiter::{InMemoryTenantLimiter, LimiterConfig, LimiterError, TenantLimiter, TenantSlot};
#[cfg(feature = "redis")]
pub use limiter::RedisTenantLimiter;
pub use stats::{WorkerStats, WorkerStatsSnapshot};
pub use watchdog::StaleExecutionWatchdog;
pub use worker::{Worker, WorkerDeps};
