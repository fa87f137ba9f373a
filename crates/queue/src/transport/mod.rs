//! Queue transport
//!
//! This module provides:
//! - [`QueueTransport`] - operational contract over the cloud queue wire API
//! - [`InMemoryQueue`] - in-process emulator with visibility, receive counts and redrive
//! - [`SqsTransport`] - Amazon SQS binding (feature `sqs`), endpoint-configurable
//!
//! Receive parameters are clamped into the legal range; batch calls over
//! [`MAX_BATCH_SIZE`] fail before any network call.

mod memory;
#[cfg(feature = "sqs")]
mod sqs;

use async_trait::async_trait;
use flowq_core::MessageAttributes;
use serde::Serialize;

use crate::error::QueueError;

pub use memory::InMemoryQueue;
#[cfg(feature = "sqs")]
pub use sqs::SqsTransport;

/// Maximum entries in one batch request
pub const MAX_BATCH_SIZE: usize = 10;

/// Legal range for messages per receive call
pub const MIN_RECEIVE_MESSAGES: i32 = 1;
pub const MAX_RECEIVE_MESSAGES: i32 = 10;

/// Longest allowed long-poll wait, in seconds
pub const MAX_WAIT_SECONDS: i32 = 20;

/// Longest allowed visibility timeout (12 hours), in seconds
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;

/// Clamp messages-per-receive into 1..=10
pub fn clamp_max_messages(max_messages: i32) -> i32 {
    max_messages.clamp(MIN_RECEIVE_MESSAGES, MAX_RECEIVE_MESSAGES)
}

/// Clamp long-poll wait into 0..=20 seconds
pub fn clamp_wait_seconds(wait_seconds: i32) -> i32 {
    wait_seconds.clamp(0, MAX_WAIT_SECONDS)
}

/// Clamp a visibility timeout into 0..=12h
pub fn clamp_visibility_timeout(seconds: i32) -> i32 {
    seconds.clamp(0, MAX_VISIBILITY_TIMEOUT_SECONDS)
}

/// Reject batches larger than [`MAX_BATCH_SIZE`]
pub fn ensure_batch_size(operation: &'static str, size: usize) -> Result<(), QueueError> {
    if size > MAX_BATCH_SIZE {
        return Err(QueueError::BatchTooLarge {
            operation,
            size,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Message to send as part of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Batch-unique entry id, echoed back in per-entry failures
    pub id: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

/// Message returned by a receive call
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    /// Token required to delete or change visibility of this delivery
    pub receipt_handle: String,
    pub attributes: MessageAttributes,
    /// Native delivery counter maintained by the queue (1 on first delivery)
    pub receive_count: u32,
}

/// Point-in-time message counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueAttributes {
    /// Available for receipt
    pub visible: u64,
    /// Received but not yet deleted or visible again
    pub in_flight: u64,
    /// Sent with a delay that has not elapsed
    pub delayed: u64,
}

impl QueueAttributes {
    pub fn total(&self) -> u64 {
        self.visible + self.in_flight + self.delayed
    }
}

/// Operational contract over a cloud message queue.
///
/// All errors are wrapped with an operation-specific [`QueueError`] variant.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Send one message, returning the queue-assigned message id
    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, QueueError>;

    /// Send up to [`MAX_BATCH_SIZE`] messages. Per-entry failures are aggregated.
    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<(), QueueError>;

    /// Long-poll for up to `max_messages` messages, waiting at most `wait_seconds`
    async fn receive(
        &self,
        max_messages: i32,
        wait_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Delete up to [`MAX_BATCH_SIZE`] deliveries. Per-entry failures are aggregated.
    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<(), QueueError>;

    /// Hide (or re-expose, with 0) a received message for `timeout_seconds`
    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout_seconds: i32,
    ) -> Result<(), QueueError>;

    /// Counts for the main queue
    async fn get_attributes(&self) -> Result<QueueAttributes, QueueError>;

    /// Counts for the dead-letter queue; `Ok(None)` when none is configured
    async fn get_dead_letter_attributes(&self) -> Result<Option<QueueAttributes>, QueueError>;
}
