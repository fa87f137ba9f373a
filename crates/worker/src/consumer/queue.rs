//! Queue-mode consumer
//!
//! Each slot long-polls the transport and dispatches received messages one
//! at a time under the processing deadline. Messages waiting behind the one
//! in progress are kept invisible until their turn. Settling a message follows the
//! handler outcome: delete on completion, extend visibility on requeue,
//! leave alone on failure so native redelivery (and eventually the DLQ)
//! takes over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flowq_core::ExecutionMessage;
use flowq_queue::{
    effective_retry_count, extend_visibility, QueueConfig, QueueTransport, ReceivedMessage,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::{pause, SlotState, SlotStates};
use crate::handler::{ExecutionHandler, ProcessOutcome};

/// Consumer over a [`QueueTransport`]
pub struct QueueConsumer {
    transport: Arc<dyn QueueTransport>,
    handler: Arc<ExecutionHandler>,
    config: QueueConfig,
    slots: Arc<SlotStates>,
}

impl QueueConsumer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        handler: Arc<ExecutionHandler>,
        config: QueueConfig,
    ) -> Self {
        let slots = Arc::new(SlotStates::new(config.concurrent_workers));
        Self {
            transport,
            handler,
            config,
            slots,
        }
    }

    pub fn slot_states(&self) -> &Arc<SlotStates> {
        &self.slots
    }

    pub fn transport(&self) -> &Arc<dyn QueueTransport> {
        &self.transport
    }

    pub fn spawn(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            slots = self.config.concurrent_workers,
            max_messages = self.config.max_messages,
            wait_time_seconds = self.config.wait_time_seconds,
            "Starting queue consumer"
        );

        (0..self.config.concurrent_workers)
            .map(|slot| {
                let consumer = Arc::clone(&self);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move { consumer.run_slot(slot, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_slot(&self, slot: usize, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(slot, "Queue slot started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.slots.set(slot, SlotState::Polling);
            let received = tokio::select! {
                result = self.transport.receive(self.config.max_messages, self.config.wait_time_seconds) => result,
                _ = shutdown_rx.changed() => break,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    self.slots.set(slot, SlotState::Idle);
                    // A long poll already waited; only a short poll needs the idle pause
                    if self.config.wait_time_seconds == 0
                        && pause(self.config.poll_interval, &mut shutdown_rx).await
                    {
                        break;
                    }
                }
                Ok(messages) => {
                    self.slots.set(slot, SlotState::Dispatching);
                    let waiting = Mutex::new(
                        messages
                            .iter()
                            .map(|m| m.receipt_handle.clone())
                            .collect::<Vec<_>>(),
                    );
                    tokio::select! {
                        _ = self.dispatch_batch(messages, &waiting, &shutdown_rx) => {}
                        _ = self.hold_waiting(&waiting) => {}
                    }
                    self.slots.set(slot, SlotState::Idle);
                }
                Err(e) => {
                    error!(slot, error = %e, "Failed to receive messages");
                    self.slots.set(slot, SlotState::Idle);
                    if pause(self.config.poll_interval, &mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        self.slots.set(slot, SlotState::Stopped);
        debug!(slot, "Queue slot stopped");
    }

    /// Dispatch a received batch in order, releasing the rest on shutdown
    async fn dispatch_batch(
        &self,
        messages: Vec<ReceivedMessage>,
        waiting: &Mutex<Vec<String>>,
        shutdown_rx: &watch::Receiver<bool>,
    ) {
        let mut messages = messages.into_iter();
        while let Some(message) = messages.next() {
            if *shutdown_rx.borrow() {
                waiting.lock().clear();
                self.release_undispatched(std::iter::once(message).chain(messages))
                    .await;
                return;
            }
            waiting
                .lock()
                .retain(|receipt| receipt != &message.receipt_handle);
            self.dispatch(message).await;
        }
    }

    /// Keep received-but-not-started messages invisible. Never returns.
    async fn hold_waiting(&self, waiting: &Mutex<Vec<String>>) {
        let (visibility, period) = self.heartbeat();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;
            let receipts = waiting.lock().clone();
            for receipt in receipts {
                if let Err(e) = self.transport.change_visibility(&receipt, visibility).await {
                    warn!(error = %e, "Failed to extend visibility of waiting message");
                }
            }
        }
    }

    /// Visibility to re-apply and how often: half the timeout, at least 1s
    fn heartbeat(&self) -> (i32, Duration) {
        let visibility = self.config.visibility_timeout.max(1);
        let period = Duration::from_secs((visibility as u64 / 2).max(1));
        (visibility, period)
    }

    /// Process one received message and settle it
    #[instrument(skip(self, message), fields(message_id = %message.message_id, receive_count = message.receive_count))]
    pub async fn dispatch(&self, message: ReceivedMessage) {
        let execution = match ExecutionMessage::from_json(&message.body)
            .and_then(|m| m.validate().map(|()| m))
        {
            Ok(execution) => execution,
            Err(e) => {
                // Left undeleted: native redelivery moves it to the DLQ
                error!(error = %e, "Malformed execution message");
                self.handler.stats().record_failed();
                return;
            }
        };

        let retry_count = effective_retry_count(execution.retry_count, message.receive_count);
        let work = self
            .handler
            .handle(&execution.tenant_id, &execution.execution_id, retry_count);

        let outcome = match tokio::time::timeout(
            self.config.process_timeout,
            self.with_heartbeat(&message.receipt_handle, work),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                self.handler
                    .deadline_exceeded(
                        &execution.tenant_id,
                        &execution.execution_id,
                        self.config.process_timeout,
                    )
                    .await
            }
        };

        self.settle(&message, outcome).await;
    }

    async fn settle(&self, message: &ReceivedMessage, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Completed => {
                if !self.config.delete_after_process {
                    return;
                }
                match self.transport.delete(&message.receipt_handle).await {
                    Ok(()) => debug!("Message deleted"),
                    Err(e) => error!(error = %e, "Failed to delete processed message"),
                }
            }
            ProcessOutcome::Requeued(delay) => {
                if let Err(e) =
                    extend_visibility(self.transport.as_ref(), &message.receipt_handle, delay).await
                {
                    error!(error = %e, "Failed to requeue message; it returns after the visibility timeout");
                }
            }
            ProcessOutcome::Failed(e) => {
                debug!(error = %e, "Leaving message for redelivery");
            }
        }
    }

    /// Keep a long-running message invisible while `work` runs
    async fn with_heartbeat<F>(&self, receipt_handle: &str, work: F) -> ProcessOutcome
    where
        F: Future<Output = ProcessOutcome>,
    {
        let (visibility, period) = self.heartbeat();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tokio::pin!(work);

        loop {
            tokio::select! {
                outcome = &mut work => return outcome,
                _ = ticker.tick() => {
                    match self.transport.change_visibility(receipt_handle, visibility).await {
                        Ok(()) => debug!(visibility_secs = visibility, "Extended visibility of in-flight message"),
                        Err(e) => warn!(error = %e, "Failed to extend visibility of in-flight message"),
                    }
                }
            }
        }
    }

    /// Make messages received during shutdown visible again right away
    async fn release_undispatched(&self, messages: impl Iterator<Item = ReceivedMessage>) {
        for message in messages {
            if let Err(e) = self.transport.change_visibility(&message.receipt_handle, 0).await {
                warn!(message_id = %message.message_id, error = %e, "Failed to release undispatched message");
            }
        }
    }
}
