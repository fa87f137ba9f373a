//! In-memory execution repository for tests and local runs

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use flowq_core::{Execution, ExecutionRepository, ExecutionStatus, RepositoryError};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::stale_cutoff;

type Key = (String, String);

/// In-memory [`ExecutionRepository`]
///
/// # Example
///
/// ```
/// use flowq_core::Execution;
/// use flowq_storage::InMemoryExecutionRepository;
///
/// let repo = InMemoryExecutionRepository::new();
/// repo.insert(Execution::pending("e1", "t1", "w1", 1, "webhook"));
/// assert_eq!(repo.len(), 1);
/// ```
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<Key, Execution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an execution
    pub fn insert(&self, execution: Execution) {
        let key = (execution.tenant_id.clone(), execution.id.clone());
        self.executions.write().insert(key, execution);
    }

    /// Snapshot of one execution
    pub fn get(&self, tenant_id: &str, execution_id: &str) -> Option<Execution> {
        self.executions
            .read()
            .get(&(tenant_id.to_string(), execution_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn get_execution(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Execution, RepositoryError> {
        self.get(tenant_id, execution_id)
            .ok_or_else(|| RepositoryError::NotFound {
                tenant_id: tenant_id.to_string(),
                execution_id: execution_id.to_string(),
            })
    }

    async fn update_status(
        &self,
        tenant_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&(tenant_id.to_string(), execution_id.to_string()))
            .ok_or_else(|| RepositoryError::NotFound {
                tenant_id: tenant_id.to_string(),
                execution_id: execution_id.to_string(),
            })?;
        execution.transition(status, error_message);
        Ok(())
    }

    async fn claim_next_pending(&self) -> Result<Option<Execution>, RepositoryError> {
        let now = Utc::now();
        let mut executions = self.executions.write();
        let oldest = executions
            .values_mut()
            .filter(|e| e.is_claimable(now))
            .min_by_key(|e| e.created_at);

        Ok(oldest.map(|execution| {
            execution.transition(ExecutionStatus::Running, None);
            execution.clone()
        }))
    }

    async fn defer(
        &self,
        tenant_id: &str,
        execution_id: &str,
        delay: Duration,
    ) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&(tenant_id.to_string(), execution_id.to_string()))
            .ok_or_else(|| RepositoryError::NotFound {
                tenant_id: tenant_id.to_string(),
                execution_id: execution_id.to_string(),
            })?;
        execution.defer(delay);
        Ok(())
    }

    async fn fail_stale_executions(
        &self,
        older_than: Duration,
        error_message: &str,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let cutoff = stale_cutoff(older_than);
        let mut failed = Vec::new();

        for execution in self.executions.write().values_mut() {
            let active = matches!(
                execution.status,
                ExecutionStatus::Pending | ExecutionStatus::Running
            );
            if active && execution.created_at < cutoff {
                execution.transition(ExecutionStatus::Failed, Some(error_message));
                failed.push(execution.clone());
            }
        }

        if !failed.is_empty() {
            debug!(count = failed.len(), "Failed stale executions");
        }
        Ok(failed)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
