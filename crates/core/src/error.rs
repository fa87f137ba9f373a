// Error types shared across the execution queue crates

use thiserror::Error;

/// Errors raised while validating or (de)serializing an [`ExecutionMessage`].
///
/// Every missing identity field has its own variant so producers can tell
/// exactly which field was rejected.
///
/// [`ExecutionMessage`]: crate::ExecutionMessage
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("execution_id is required")]
    MissingExecutionId,

    #[error("tenant_id is required")]
    MissingTenantId,

    #[error("workflow_id is required")]
    MissingWorkflowId,

    #[error("workflow_version must be greater than zero (got {0})")]
    InvalidWorkflowVersion(i32),

    #[error("trigger_type is required")]
    MissingTriggerType,

    /// A loosely-typed field could not be coerced into the expected type
    #[error("field '{field}' has an unsupported type: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MessageError {
    fn from(err: serde_json::Error) -> Self {
        MessageError::Serialization(err.to_string())
    }
}

/// Errors returned by an [`ExecutionRepository`](crate::ExecutionRepository)
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Execution not found for the tenant
    #[error("execution not found: tenant={tenant_id} id={execution_id}")]
    NotFound {
        tenant_id: String,
        execution_id: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Stored data could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Error returned by an [`Executor`](crate::Executor).
///
/// The queue core never inspects executor failures; they are logged,
/// counted and handed back to the queue's native redelivery.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The workflow run itself reported a failure
    #[error("execution failed: {0}")]
    Failed(String),

    /// Anything else (transport to the engine, decoding, ...)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed(message.into())
    }
}
