//! Amazon SQS binding
//!
//! Talks to any endpoint that speaks the SQS API; `QUEUE_ENDPOINT` points it
//! at a local emulator.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::{Credentials, Region};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, DeleteMessageBatchRequestEntry, MessageAttributeValue,
    MessageSystemAttributeName, QueueAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use flowq_core::MessageAttributes;
use tracing::{debug, instrument, warn};

use super::{
    clamp_max_messages, clamp_visibility_timeout, clamp_wait_seconds, ensure_batch_size,
    OutgoingMessage, QueueAttributes, QueueTransport, ReceivedMessage,
};
use crate::config::QueueConfig;
use crate::error::{BatchEntryFailure, QueueError};

/// SQS-backed [`QueueTransport`]
#[derive(Debug, Clone)]
pub struct SqsTransport {
    client: Client,
    queue_url: String,
    dlq_url: Option<String>,
}

impl SqsTransport {
    /// Build a client from queue configuration.
    ///
    /// Static credentials are used when both key parts are set; otherwise
    /// the default provider chain applies.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        if config.queue_url.trim().is_empty() {
            return Err(QueueError::Config("queue url is empty".to_string()));
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "flowq-static",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let shared = loader.load().await;
        debug!(
            queue_url = %config.queue_url,
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            "SQS client configured"
        );

        Ok(Self::from_client(
            Client::new(&shared),
            config.queue_url.clone(),
            config.dlq_url.clone(),
        ))
    }

    pub fn from_client(client: Client, queue_url: String, dlq_url: Option<String>) -> Self {
        Self {
            client,
            queue_url,
            dlq_url,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    async fn fetch_attributes(&self, queue_url: &str) -> Result<QueueAttributes, QueueError> {
        let out = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesDelayed)
            .send()
            .await
            .map_err(|e| QueueError::Attributes(DisplayErrorContext(&e).to_string()))?;

        let attrs = out.attributes();
        let count = |name: QueueAttributeName| -> u64 {
            attrs
                .and_then(|a| a.get(&name))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };

        Ok(QueueAttributes {
            visible: count(QueueAttributeName::ApproximateNumberOfMessages),
            in_flight: count(QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
            delayed: count(QueueAttributeName::ApproximateNumberOfMessagesDelayed),
        })
    }
}

fn string_attribute(value: &str) -> Result<MessageAttributeValue, String> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| e.to_string())
}

fn collect_failures(
    operation: &'static str,
    total: usize,
    failed: &[BatchResultErrorEntry],
) -> Result<(), QueueError> {
    if failed.is_empty() {
        return Ok(());
    }

    let failures = failed
        .iter()
        .map(|f| BatchEntryFailure {
            id: f.id().to_string(),
            code: f.code().to_string(),
            message: f.message().unwrap_or_default().to_string(),
        })
        .collect();

    Err(QueueError::BatchPartial {
        operation,
        total,
        failures,
    })
}

#[async_trait]
impl QueueTransport for SqsTransport {
    #[instrument(skip(self, body, attributes), fields(queue_url = %self.queue_url))]
    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, QueueError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);

        for (name, value) in attributes {
            request = request.message_attributes(name, string_attribute(value).map_err(QueueError::Send)?);
        }

        let out = request
            .send()
            .await
            .map_err(|e| QueueError::Send(DisplayErrorContext(&e).to_string()))?;

        Ok(out.message_id().unwrap_or_default().to_string())
    }

    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<(), QueueError> {
        ensure_batch_size("send_batch", messages.len())?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            let mut entry = SendMessageBatchRequestEntry::builder()
                .id(&message.id)
                .message_body(&message.body);
            for (name, value) in &message.attributes {
                entry = entry.message_attributes(
                    name,
                    string_attribute(value).map_err(QueueError::SendBatch)?,
                );
            }
            entries.push(
                entry
                    .build()
                    .map_err(|e| QueueError::SendBatch(e.to_string()))?,
            );
        }

        let out = self
            .client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| QueueError::SendBatch(DisplayErrorContext(&e).to_string()))?;

        collect_failures("send_batch", messages.len(), out.failed())
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(clamp_max_messages(max_messages))
            .wait_time_seconds(clamp_wait_seconds(wait_seconds))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let mut received = Vec::with_capacity(out.messages().len());
        for message in out.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(message_id = ?message.message_id(), "Received message without receipt handle");
                continue;
            };

            let receive_count = message
                .attributes()
                .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);

            let attributes = message
                .message_attributes()
                .map(|attrs: &HashMap<String, MessageAttributeValue>| {
                    attrs
                        .iter()
                        .filter_map(|(k, v)| v.string_value().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();

            received.push(ReceivedMessage {
                message_id: message.message_id().unwrap_or_default().to_string(),
                body: message.body().unwrap_or_default().to_string(),
                receipt_handle: receipt_handle.to_string(),
                attributes,
                receive_count,
            });
        }

        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<(), QueueError> {
        ensure_batch_size("delete_batch", receipt_handles.len())?;
        if receipt_handles.is_empty() {
            return Ok(());
        }

        let entries = receipt_handles
            .iter()
            .enumerate()
            .map(|(index, handle)| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(index.to_string())
                    .receipt_handle(handle)
                    .build()
                    .map_err(|e| QueueError::DeleteBatch(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let out = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| QueueError::DeleteBatch(DisplayErrorContext(&e).to_string()))?;

        collect_failures("delete_batch", receipt_handles.len(), out.failed())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout_seconds: i32,
    ) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(clamp_visibility_timeout(timeout_seconds))
            .send()
            .await
            .map_err(|e| QueueError::ChangeVisibility(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn get_attributes(&self) -> Result<QueueAttributes, QueueError> {
        self.fetch_attributes(&self.queue_url).await
    }

    async fn get_dead_letter_attributes(&self) -> Result<Option<QueueAttributes>, QueueError> {
        match &self.dlq_url {
            Some(url) => self.fetch_attributes(url).await.map(Some),
            None => Ok(None),
        }
    }
}
