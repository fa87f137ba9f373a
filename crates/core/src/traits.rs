// Collaborator traits
// Decision: The worker depends on the workflow store and the engine only through these seams

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ExecutorError, RepositoryError};
use crate::execution::{Execution, ExecutionStatus};

/// Workflow-execution store.
///
/// Implementations: PostgreSQL (production, polling mode) and in-memory (tests, local runs).
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Load an execution by tenant and id
    async fn get_execution(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Execution, RepositoryError>;

    /// Move an execution to `status`, recording `error_message` when given
    async fn update_status(
        &self,
        tenant_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Claim the oldest pending execution, marking it running.
    ///
    /// `Ok(None)` means there is no work, which is not an error.
    async fn claim_next_pending(&self) -> Result<Option<Execution>, RepositoryError>;

    /// Return a claimed execution to pending, unclaimable until `delay` has passed.
    ///
    /// Other pending executions stay claimable in the meantime.
    async fn defer(
        &self,
        tenant_id: &str,
        execution_id: &str,
        delay: Duration,
    ) -> Result<(), RepositoryError>;

    /// Fail every pending or running execution created more than `older_than` ago.
    ///
    /// Returns the executions that were failed.
    async fn fail_stale_executions(
        &self,
        older_than: Duration,
        error_message: &str,
    ) -> Result<Vec<Execution>, RepositoryError>;

    /// Connectivity check for health reporting
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Runs a loaded execution (the workflow engine)
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, execution: &Execution) -> Result<(), ExecutorError>;
}
