//! Execution publisher
//!
//! Validates, serializes and sends [`ExecutionMessage`]s. Producers that do
//! not want to depend on the message type call through
//! [`ExecutionPublisher::publish_value`] with a loosely-typed JSON object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flowq_core::{ExecutionMessage, MessageError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::QueueError;
use crate::transport::{ensure_batch_size, OutgoingMessage, QueueTransport};

/// Errors from publishing
#[derive(Debug, Error)]
pub enum PublishError {
    /// Rejected before any network call
    #[error("invalid execution message: {0}")]
    Invalid(#[from] MessageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Seam other services publish through
#[async_trait]
pub trait ExecutionPublisher: Send + Sync {
    /// Publish one message, returning the queue-assigned message id
    async fn publish_execution(&self, message: &ExecutionMessage) -> Result<String, PublishError>;

    /// Extract and coerce fields from a JSON object, then publish
    async fn publish_value(&self, value: &Value) -> Result<String, PublishError> {
        let message = ExecutionMessage::from_value(value)?;
        self.publish_execution(&message).await
    }
}

/// Publish counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

/// Publisher over any [`QueueTransport`]
pub struct Publisher {
    transport: Arc<dyn QueueTransport>,
    published: AtomicU64,
    failed: AtomicU64,
}

impl Publisher {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Publish up to ten messages in one request.
    ///
    /// Every message is validated before the request is made; a single
    /// invalid message rejects the whole batch. Entries that fail on the
    /// queue side count as failed, the rest as published.
    pub async fn publish_batch(&self, messages: &[ExecutionMessage]) -> Result<(), PublishError> {
        let result = self.send_batch(messages).await;

        match &result {
            Ok(()) => {
                self.published
                    .fetch_add(messages.len() as u64, Ordering::Relaxed);
            }
            Err(PublishError::Queue(QueueError::BatchPartial { total, failures, .. })) => {
                let failed = failures.len() as u64;
                self.failed.fetch_add(failed, Ordering::Relaxed);
                self.published
                    .fetch_add((*total as u64).saturating_sub(failed), Ordering::Relaxed);
            }
            Err(e) => {
                warn!(count = messages.len(), error = %e, "Failed to publish execution batch");
                self.failed
                    .fetch_add(messages.len() as u64, Ordering::Relaxed);
            }
        }

        result
    }

    async fn send_batch(&self, messages: &[ExecutionMessage]) -> Result<(), PublishError> {
        ensure_batch_size("publish_batch", messages.len())?;

        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            message.validate()?;
            entries.push(OutgoingMessage {
                id: index.to_string(),
                body: message.to_json()?,
                attributes: message.attributes(),
            });
        }

        self.transport.send_batch(&entries).await?;
        debug!(count = entries.len(), "Published execution batch");
        Ok(())
    }

    async fn send_one(&self, message: &ExecutionMessage) -> Result<String, PublishError> {
        message.validate()?;
        let body = message.to_json()?;
        Ok(self.transport.send(&body, &message.attributes()).await?)
    }
}

#[async_trait]
impl ExecutionPublisher for Publisher {
    #[instrument(skip(self, message), fields(execution_id = %message.execution_id, tenant_id = %message.tenant_id))]
    async fn publish_execution(&self, message: &ExecutionMessage) -> Result<String, PublishError> {
        match self.send_one(message).await {
            Ok(message_id) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(message_id = %message_id, "Published execution");
                Ok(message_id)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to publish execution");
                Err(e)
            }
        }
    }

    async fn publish_value(&self, value: &Value) -> Result<String, PublishError> {
        match ExecutionMessage::from_value(value) {
            Ok(message) => self.publish_execution(&message).await,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Rejected loosely-typed execution message");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryQueue;
    use flowq_core::message::attribute;
    use serde_json::json;

    fn setup() -> (Arc<InMemoryQueue>, Publisher) {
        let queue = Arc::new(InMemoryQueue::new("executions"));
        let publisher = Publisher::new(queue.clone());
        (queue, publisher)
    }

    #[tokio::test]
    async fn test_publish_sends_body_and_attributes() {
        let (queue, publisher) = setup();
        let message = ExecutionMessage::new("e1", "t1", "w1", 1, "webhook").with_correlation_id("c1");

        publisher.publish_execution(&message).await.unwrap();

        let received = queue.receive(1, 0).await.unwrap().remove(0);
        let decoded = ExecutionMessage::from_json(&received.body).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(received.attributes.get(attribute::TENANT_ID).map(String::as_str), Some("t1"));
        assert_eq!(
            received.attributes.get(attribute::CORRELATION_ID).map(String::as_str),
            Some("c1")
        );
        assert_eq!(publisher.stats(), PublisherStats { published: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_invalid_message_never_reaches_queue() {
        let (queue, publisher) = setup();
        let message = ExecutionMessage::new("e1", "", "w1", 1, "webhook");

        let err = publisher.publish_execution(&message).await.unwrap_err();
        assert!(matches!(err, PublishError::Invalid(MessageError::MissingTenantId)));
        assert!(queue.is_empty());
        assert_eq!(publisher.stats(), PublisherStats { published: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_publish_value_coerces_fields() {
        let (queue, publisher) = setup();
        let value = json!({
            "execution_id": 42,
            "tenant_id": "t1",
            "workflow_id": "w1",
            "workflow_version": "3",
            "trigger_type": "schedule",
            "unknown": true
        });

        publisher.publish_value(&value).await.unwrap();

        let received = queue.receive(1, 0).await.unwrap().remove(0);
        let decoded = ExecutionMessage::from_json(&received.body).unwrap();
        assert_eq!(decoded.execution_id, "42");
        assert_eq!(decoded.workflow_version, 3);

        let missing = json!({ "tenant_id": "t1" });
        assert!(matches!(
            publisher.publish_value(&missing).await,
            Err(PublishError::Invalid(MessageError::MissingExecutionId))
        ));
        assert_eq!(publisher.stats(), PublisherStats { published: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_publish_batch() {
        let (queue, publisher) = setup();
        let messages: Vec<_> = (0..3)
            .map(|i| ExecutionMessage::new(format!("e{}", i), "t1", "w1", 1, "manual"))
            .collect();

        publisher.publish_batch(&messages).await.unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(publisher.stats().published, 3);
    }

    #[tokio::test]
    async fn test_publish_batch_rejects_invalid_and_oversized() {
        let (queue, publisher) = setup();

        let mut messages: Vec<_> = (0..2)
            .map(|i| ExecutionMessage::new(format!("e{}", i), "t1", "w1", 1, "manual"))
            .collect();
        messages.push(ExecutionMessage::new("e9", "t1", "w1", 0, "manual"));
        assert!(matches!(
            publisher.publish_batch(&messages).await,
            Err(PublishError::Invalid(MessageError::InvalidWorkflowVersion(0)))
        ));
        assert!(queue.is_empty());

        let oversized: Vec<_> = (0..11)
            .map(|i| ExecutionMessage::new(format!("e{}", i), "t1", "w1", 1, "manual"))
            .collect();
        assert!(matches!(
            publisher.publish_batch(&oversized).await,
            Err(PublishError::Queue(QueueError::BatchTooLarge { size: 11, .. }))
        ));
        assert!(queue.is_empty());
        assert_eq!(publisher.stats().failed, 14);
    }
}
