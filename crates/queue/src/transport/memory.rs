//! In-process queue emulator
//!
//! Implements the same semantics the worker relies on from the cloud queue:
//! per-delivery receipt handles, visibility deadlines, delayed delivery,
//! native receive counting and redrive to a dead-letter queue once the
//! receive count exceeds `max_receive_count`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowq_core::MessageAttributes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    clamp_max_messages, clamp_visibility_timeout, clamp_wait_seconds, ensure_batch_size,
    OutgoingMessage, QueueAttributes, QueueTransport, ReceivedMessage,
};
use crate::error::{BatchEntryFailure, QueueError};

/// Default visibility timeout, matching the cloud queue default
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct StoredMessage {
    message_id: String,
    body: String,
    attributes: MessageAttributes,
    receive_count: u32,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

struct Redrive {
    dead_letter: Arc<InMemoryQueue>,
    max_receive_count: u32,
}

/// In-memory queue with cloud-queue delivery semantics.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use flowq_queue::transport::InMemoryQueue;
///
/// let dlq = Arc::new(InMemoryQueue::new("executions-dlq"));
/// let queue = InMemoryQueue::new("executions").with_dead_letter_queue(dlq, 3);
/// assert!(queue.is_empty());
/// ```
pub struct InMemoryQueue {
    name: String,
    messages: Mutex<Vec<StoredMessage>>,
    notify: Notify,
    visibility_timeout: Duration,
    redrive: Option<Redrive>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(Vec::new()),
            notify: Notify::new(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            redrive: None,
        }
    }

    /// Set the visibility timeout applied on receive
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Attach a dead-letter queue; messages received more than
    /// `max_receive_count` times are moved there on the next receive
    pub fn with_dead_letter_queue(mut self, dlq: Arc<InMemoryQueue>, max_receive_count: u32) -> Self {
        self.redrive = Some(Redrive {
            dead_letter: dlq,
            max_receive_count: max_receive_count.max(1),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total messages held (visible, in flight and delayed)
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send a message that only becomes visible after `delay`
    pub fn send_delayed(&self, body: &str, attributes: &MessageAttributes, delay: Duration) -> String {
        let message_id = Uuid::now_v7().to_string();
        self.push(StoredMessage {
            message_id: message_id.clone(),
            body: body.to_string(),
            attributes: attributes.clone(),
            receive_count: 0,
            visible_at: Instant::now() + delay,
            receipt_handle: None,
        });
        message_id
    }

    /// Bodies of all held messages, oldest first
    pub fn bodies(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.body.clone()).collect()
    }

    /// Native receive count of a message, if it is still held
    pub fn receive_count_of(&self, message_id: &str) -> Option<u32> {
        self.messages
            .lock()
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.receive_count)
    }

    /// Remaining invisibility of a message (zero when visible)
    pub fn invisible_for(&self, message_id: &str) -> Option<Duration> {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.visible_at.saturating_duration_since(now))
    }

    /// Current counts, computed without a network round trip
    pub fn snapshot(&self) -> QueueAttributes {
        let now = Instant::now();
        let messages = self.messages.lock();
        let mut attrs = QueueAttributes::default();
        for m in messages.iter() {
            if m.visible_at <= now {
                attrs.visible += 1;
            } else if m.receipt_handle.is_some() {
                attrs.in_flight += 1;
            } else {
                attrs.delayed += 1;
            }
        }
        attrs
    }

    fn push(&self, message: StoredMessage) {
        self.messages.lock().push(message);
        self.notify.notify_waiters();
    }

    /// Deliver up to `max` visible messages.
    ///
    /// Also returns the instant the next invisible message becomes visible,
    /// so a long poll can wake up for it.
    fn take_visible(&self, max: usize) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut delivered = Vec::new();
        let mut dead = Vec::new();
        let mut next_visible: Option<Instant> = None;

        {
            let mut messages = self.messages.lock();
            let mut i = 0;
            while i < messages.len() {
                let message = &mut messages[i];

                if message.visible_at > now {
                    next_visible = Some(match next_visible {
                        Some(t) => t.min(message.visible_at),
                        None => message.visible_at,
                    });
                    i += 1;
                    continue;
                }

                if let Some(redrive) = &self.redrive {
                    if message.receive_count >= redrive.max_receive_count {
                        dead.push(messages.remove(i));
                        continue;
                    }
                }

                if delivered.len() < max {
                    let receipt = Uuid::now_v7().to_string();
                    message.receive_count += 1;
                    message.visible_at = now + self.visibility_timeout;
                    message.receipt_handle = Some(receipt.clone());

                    delivered.push(ReceivedMessage {
                        message_id: message.message_id.clone(),
                        body: message.body.clone(),
                        receipt_handle: receipt,
                        attributes: message.attributes.clone(),
                        receive_count: message.receive_count,
                    });
                }
                i += 1;
            }
        }

        if let Some(redrive) = &self.redrive {
            for message in dead {
                debug!(
                    queue = %self.name,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "Moving message to dead-letter queue"
                );
                redrive.dead_letter.push(StoredMessage {
                    receive_count: 0,
                    visible_at: now,
                    receipt_handle: None,
                    ..message
                });
            }
        }

        (delivered, next_visible)
    }

    fn validate_body(body: &str) -> Result<(), String> {
        if body.is_empty() {
            return Err("message body must not be empty".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, QueueError> {
        Self::validate_body(body).map_err(QueueError::Send)?;
        Ok(self.send_delayed(body, attributes, Duration::ZERO))
    }

    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<(), QueueError> {
        ensure_batch_size("send_batch", messages.len())?;

        let mut ids = std::collections::HashSet::new();
        if !messages.iter().all(|m| ids.insert(m.id.as_str())) {
            return Err(QueueError::SendBatch(
                "batch entry ids must be distinct".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for message in messages {
            match Self::validate_body(&message.body) {
                Ok(()) => {
                    self.send_delayed(&message.body, &message.attributes, Duration::ZERO);
                }
                Err(reason) => failures.push(BatchEntryFailure {
                    id: message.id.clone(),
                    code: "InvalidMessageContents".to_string(),
                    message: reason,
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(QueueError::BatchPartial {
                operation: "send_batch",
                total: messages.len(),
                failures,
            })
        }
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max = clamp_max_messages(max_messages) as usize;
        let wait = Duration::from_secs(clamp_wait_seconds(wait_seconds) as u64);
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before checking so a concurrent send is not missed
            let notified = self.notify.notified();

            let (batch, next_visible) = self.take_visible(max);
            if !batch.is_empty() {
                trace!(queue = %self.name, count = batch.len(), "Received messages");
                return Ok(batch);
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        match messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
        {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::Delete(format!(
                "receipt handle is invalid: {}",
                receipt_handle
            ))),
        }
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<(), QueueError> {
        ensure_batch_size("delete_batch", receipt_handles.len())?;

        let mut failures = Vec::new();
        for (index, handle) in receipt_handles.iter().enumerate() {
            if let Err(e) = self.delete(handle).await {
                failures.push(BatchEntryFailure {
                    id: index.to_string(),
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(QueueError::BatchPartial {
                operation: "delete_batch",
                total: receipt_handles.len(),
                failures,
            })
        }
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout_seconds: i32,
    ) -> Result<(), QueueError> {
        let seconds = clamp_visibility_timeout(timeout_seconds);
        {
            let mut messages = self.messages.lock();
            let message = messages
                .iter_mut()
                .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
                .ok_or_else(|| {
                    QueueError::ChangeVisibility(format!(
                        "receipt handle is invalid: {}",
                        receipt_handle
                    ))
                })?;
            message.visible_at = Instant::now() + Duration::from_secs(seconds as u64);
        }

        if seconds == 0 {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn get_attributes(&self) -> Result<QueueAttributes, QueueError> {
        Ok(self.snapshot())
    }

    async fn get_dead_letter_attributes(&self) -> Result<Option<QueueAttributes>, QueueError> {
        Ok(self.redrive.as_ref().map(|r| r.dead_letter.snapshot()))
    }
}
