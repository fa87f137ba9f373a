//! # Execution Queue
//!
//! Queue plumbing for the execution backbone.
//!
//! ## Architecture
//!
//! ```text
//! producer ──► Publisher ──► QueueTransport ──► worker (flowq-worker)
//!                                 │
//!                                 ├── SqsTransport   (cloud queue, feature `sqs`)
//!                                 └── InMemoryQueue  (local emulator)
//!
//! MetricsCollector ──► QueueTransport::get_attributes / get_dead_letter_attributes
//! ```
//!
//! Capacity conflicts are handled by [`backoff::requeue`], which extends the
//! visibility of the same delivery instead of deleting and re-sending it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowq_core::ExecutionMessage;
//! use flowq_queue::prelude::*;
//!
//! # async fn run() -> Result<(), PublishError> {
//! let queue = Arc::new(InMemoryQueue::new("executions"));
//! let publisher = Publisher::new(queue);
//!
//! let message = ExecutionMessage::new("e1", "t1", "w1", 1, "webhook");
//! publisher.publish_execution(&message).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod transport;

pub use backoff::{
    effective_retry_count, extend_visibility, requeue, requeue_delay, RequeuePolicy,
};
pub use config::{ConfigError, QueueConfig};
pub use error::{BatchEntryFailure, QueueError};
pub use metrics::{MetricsCollector, MetricsStatus, QueueDepth, QueueMetrics};
pub use publisher::{ExecutionPublisher, PublishError, Publisher, PublisherStats};
pub use transport::{
    InMemoryQueue, OutgoingMessage, QueueAttributes, QueueTransport, ReceivedMessage,
};

#[cfg(feature = "sqs")]
pub use transport::SqsTransport;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backoff::{requeue, requeue_delay};
    pub use crate::config::QueueConfig;
    pub use crate::error::QueueError;
    pub use crate::metrics::MetricsCollector;
    pub use crate::publisher::{ExecutionPublisher, PublishError, Publisher};
    pub use crate::transport::{InMemoryQueue, QueueTransport, ReceivedMessage};
}
