//! Per-execution handling shared by both consumer modes
//!
//! load execution -> take tenant slot -> run executor -> release slot.
//! A tenant at capacity is not a failure: the outcome is
//! [`ProcessOutcome::Requeued`] with the backoff delay, and the consumer
//! decides how to put the work back.

use std::sync::Arc;
use std::time::Duration;

use flowq_core::{
    Execution, ExecutionRepository, ExecutionStatus, Executor, ExecutorError, MessageError,
    RepositoryError,
};
use flowq_queue::RequeuePolicy;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::limiter::{LimiterError, TenantLimiter, TenantSlot};
use crate::stats::WorkerStats;

/// Error recorded on executions cut off by the processing deadline
pub const DEADLINE_EXCEEDED_MESSAGE: &str = "processing deadline exceeded";

/// Retryable processing failures
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed execution message: {0}")]
    InvalidMessage(#[from] MessageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Admission could not be decided; the execution is not run
    #[error("tenant limiter unavailable: {0}")]
    Limiter(#[from] LimiterError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("processing deadline of {0:?} exceeded")]
    Timeout(Duration),
}

/// Result of handling one unit of work
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Done; the message can be deleted
    Completed,
    /// Tenant at capacity; hide the work for this long and try again
    Requeued(Duration),
    /// Leave the work to native redelivery
    Failed(HandlerError),
}

impl ProcessOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed)
    }
}

/// Runs executions under tenant admission control
pub struct ExecutionHandler {
    repository: Arc<dyn ExecutionRepository>,
    executor: Arc<dyn Executor>,
    limiter: Arc<dyn TenantLimiter>,
    stats: Arc<WorkerStats>,
    requeue_policy: RequeuePolicy,
}

impl ExecutionHandler {
    pub fn new(
        repository: Arc<dyn ExecutionRepository>,
        executor: Arc<dyn Executor>,
        limiter: Arc<dyn TenantLimiter>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            repository,
            executor,
            limiter,
            stats,
            requeue_policy: RequeuePolicy::default(),
        }
    }

    pub fn with_requeue_policy(mut self, policy: RequeuePolicy) -> Self {
        self.requeue_policy = policy;
        self
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn repository(&self) -> &Arc<dyn ExecutionRepository> {
        &self.repository
    }

    /// Handle one queue delivery. `retry_count` selects the requeue delay.
    #[instrument(skip(self))]
    pub async fn handle(&self, tenant_id: &str, execution_id: &str, retry_count: u32) -> ProcessOutcome {
        let execution = match self.repository.get_execution(tenant_id, execution_id).await {
            Ok(execution) => execution,
            Err(e) => return self.fail(e.into()),
        };

        // Redelivery of work that already finished
        if matches!(
            execution.status,
            ExecutionStatus::Completed | ExecutionStatus::Cancelled
        ) {
            info!(status = %execution.status, "Execution already finished, skipping");
            return ProcessOutcome::Completed;
        }

        // Another delivery is running it; look again once that run has settled
        if execution.status == ExecutionStatus::Running {
            let delay = self.requeue_policy.delay_for_retry(retry_count);
            info!(
                delay_secs = delay.as_secs(),
                "Execution already running elsewhere, requeueing"
            );
            return ProcessOutcome::Requeued(delay);
        }

        self.admit(&execution, retry_count).await
    }

    /// Handle an execution this worker claimed from the store.
    ///
    /// The claim already marked it running; the requeue delay follows the
    /// number of times the claim was handed back.
    #[instrument(skip(self, execution), fields(tenant_id = %execution.tenant_id, execution_id = %execution.id))]
    pub async fn handle_claimed(&self, execution: &Execution) -> ProcessOutcome {
        self.admit(execution, execution.requeue_count).await
    }

    /// Record a run cut off by the processing deadline
    pub async fn deadline_exceeded(
        &self,
        tenant_id: &str,
        execution_id: &str,
        timeout: Duration,
    ) -> ProcessOutcome {
        self.stats.record_failed();
        warn!(
            tenant_id,
            execution_id,
            timeout_secs = timeout.as_secs(),
            "Processing deadline exceeded"
        );
        if let Err(e) = self
            .repository
            .update_status(
                tenant_id,
                execution_id,
                ExecutionStatus::Failed,
                Some(DEADLINE_EXCEEDED_MESSAGE),
            )
            .await
        {
            error!(execution_id, error = %e, "Failed to record processing deadline");
        }
        ProcessOutcome::Failed(HandlerError::Timeout(timeout))
    }

    async fn admit(&self, execution: &Execution, retry_count: u32) -> ProcessOutcome {
        let slot = match TenantSlot::acquire(
            Arc::clone(&self.limiter),
            &execution.tenant_id,
            &execution.id,
        )
        .await
        {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                let delay = self.requeue_policy.delay_for_retry(retry_count);
                self.stats.record_capacity_conflict();
                info!(
                    max_per_tenant = self.limiter.max_per_tenant(),
                    delay_secs = delay.as_secs(),
                    "Tenant at capacity, requeueing"
                );
                return ProcessOutcome::Requeued(delay);
            }
            Err(e) => return self.fail(e.into()),
        };

        let outcome = self.run(execution).await;
        slot.release().await;
        outcome
    }

    async fn run(&self, execution: &Execution) -> ProcessOutcome {
        let _active = self.stats.start();

        if let Err(e) = self
            .repository
            .update_status(&execution.tenant_id, &execution.id, ExecutionStatus::Running, None)
            .await
        {
            return self.fail(e.into());
        }

        debug!("Running execution");
        match self.executor.execute(execution).await {
            Ok(()) => {
                if let Err(e) = self
                    .repository
                    .update_status(
                        &execution.tenant_id,
                        &execution.id,
                        ExecutionStatus::Completed,
                        None,
                    )
                    .await
                {
                    error!(error = %e, "Execution succeeded but completion could not be recorded");
                    return self.fail(e.into());
                }
                self.stats.record_processed();
                info!("Execution completed");
                ProcessOutcome::Completed
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(update_err) = self
                    .repository
                    .update_status(
                        &execution.tenant_id,
                        &execution.id,
                        ExecutionStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    error!(error = %update_err, "Failed to record execution failure");
                }
                self.fail(e.into())
            }
        }
    }

    fn fail(&self, error: HandlerError) -> ProcessOutcome {
        self.stats.record_failed();
        warn!(error = %error, "Execution handling failed");
        ProcessOutcome::Failed(error)
    }
}
