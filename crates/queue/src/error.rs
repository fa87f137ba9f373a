//! Queue error types

use thiserror::Error;

/// A single entry that failed inside a batch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    /// Caller-supplied entry id
    pub id: String,
    /// Error code reported by the queue
    pub code: String,
    /// Human-readable reason
    pub message: String,
}

impl std::fmt::Display for BatchEntryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.id, self.code, self.message)
    }
}

/// Errors from queue transport operations.
///
/// Each network operation has its own variant carrying the underlying
/// transport error text.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to send message: {0}")]
    Send(String),

    #[error("failed to send message batch: {0}")]
    SendBatch(String),

    #[error("failed to receive messages: {0}")]
    Receive(String),

    #[error("failed to delete message: {0}")]
    Delete(String),

    #[error("failed to delete message batch: {0}")]
    DeleteBatch(String),

    #[error("failed to change message visibility: {0}")]
    ChangeVisibility(String),

    #[error("failed to get queue attributes: {0}")]
    Attributes(String),

    /// Batch request rejected before any network call
    #[error("{operation}: batch of {size} entries exceeds the maximum of {max}")]
    BatchTooLarge {
        operation: &'static str,
        size: usize,
        max: usize,
    },

    /// Some entries of a batch failed; every failure is listed
    #[error("{operation}: {} of {total} batch entries failed: {}", .failures.len(), join_failures(.failures))]
    BatchPartial {
        operation: &'static str,
        total: usize,
        failures: Vec<BatchEntryFailure>,
    },

    #[error("invalid queue configuration: {0}")]
    Config(String),
}

fn join_failures(failures: &[BatchEntryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_batch_lists_every_failure() {
        let err = QueueError::BatchPartial {
            operation: "send_batch",
            total: 3,
            failures: vec![
                BatchEntryFailure {
                    id: "0".into(),
                    code: "InvalidMessageContents".into(),
                    message: "bad body".into(),
                },
                BatchEntryFailure {
                    id: "2".into(),
                    code: "InternalError".into(),
                    message: "try again".into(),
                },
            ],
        };

        let text = err.to_string();
        assert!(text.starts_with("send_batch: 2 of 3 batch entries failed"));
        assert!(text.contains("0 (InvalidMessageContents): bad body"));
        assert!(text.contains("2 (InternalError): try again"));
    }

    #[test]
    fn test_batch_too_large_message() {
        let err = QueueError::BatchTooLarge {
            operation: "delete_batch",
            size: 11,
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "delete_batch: batch of 11 entries exceeds the maximum of 10"
        );
    }
}
