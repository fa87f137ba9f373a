//! PostgreSQL execution repository
//!
//! Reads and updates the `workflow_executions` table. Polling-mode workers
//! claim the oldest pending row with `FOR UPDATE SKIP LOCKED`, so concurrent
//! workers never claim the same execution.

use std::time::Duration;

use async_trait::async_trait;
use flowq_core::{Execution, ExecutionRepository, ExecutionStatus, RepositoryError};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};

use crate::stale_cutoff;

const EXECUTION_COLUMNS: &str = "id, tenant_id, workflow_id, workflow_version, status, \
     trigger_type, trigger_data, created_at, started_at, completed_at, error_message, \
     available_at, requeue_count";

/// PostgreSQL implementation of [`ExecutionRepository`]
///
/// # Example
///
/// ```ignore
/// use flowq_storage::PostgresExecutionRepository;
///
/// let repo = PostgresExecutionRepository::connect("postgres://localhost/flowq").await?;
/// repo.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool sized for a worker process
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = pool_options()
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Build the pool without opening a connection.
    ///
    /// Only the URL is checked here. An unreachable database surfaces as
    /// errors from the individual operations (and `ping`) until it comes back.
    pub fn connect_lazy(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = pool_options()
            .connect_lazy(database_url)
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        info!("Execution store migrations applied");
        Ok(())
    }

    /// Insert a new execution row
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, tenant_id = %execution.tenant_id))]
    pub async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, tenant_id, workflow_id, workflow_version, status, trigger_type,
                 trigger_data, created_at, started_at, completed_at, error_message,
                 available_at, requeue_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.tenant_id)
        .bind(&execution.workflow_id)
        .bind(execution.workflow_version)
        .bind(execution.status.as_str())
        .bind(&execution.trigger_type)
        .bind(&execution.trigger_data)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.error_message)
        .bind(execution.available_at)
        .bind(i32::try_from(execution.requeue_count).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create execution: {}", e);
            RepositoryError::Database(e.to_string())
        })?;
        Ok(())
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
}

fn row_to_execution(row: &PgRow) -> Result<Execution, RepositoryError> {
    let db = |e: sqlx::Error| RepositoryError::Database(e.to_string());
    let status: String = row.try_get("status").map_err(db)?;
    let requeue_count: i32 = row.try_get("requeue_count").map_err(db)?;

    Ok(Execution {
        id: row.try_get("id").map_err(db)?,
        tenant_id: row.try_get("tenant_id").map_err(db)?,
        workflow_id: row.try_get("workflow_id").map_err(db)?,
        workflow_version: row.try_get("workflow_version").map_err(db)?,
        status: status.parse().map_err(RepositoryError::Serialization)?,
        trigger_type: row.try_get("trigger_type").map_err(db)?,
        trigger_data: row.try_get("trigger_data").map_err(db)?,
        created_at: row.try_get("created_at").map_err(db)?,
        started_at: row.try_get("started_at").map_err(db)?,
        completed_at: row.try_get("completed_at").map_err(db)?,
        error_message: row.try_get("error_message").map_err(db)?,
        available_at: row.try_get("available_at").map_err(db)?,
        requeue_count: u32::try_from(requeue_count).unwrap_or(0),
    })
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    #[instrument(skip(self))]
    async fn get_execution(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Execution, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workflow_executions WHERE tenant_id = $1 AND id = $2",
            EXECUTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        match row {
            Some(row) => row_to_execution(&row),
            None => Err(RepositoryError::NotFound {
                tenant_id: tenant_id.to_string(),
                execution_id: execution_id.to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        tenant_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $3,
                error_message = $4,
                started_at = CASE
                    WHEN $3 = 'running' THEN COALESCE(started_at, NOW())
                    WHEN $3 = 'pending' THEN NULL
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $3 IN ('completed', 'failed', 'cancelled') THEN NOW()
                    ELSE completed_at
                END
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(execution_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update execution status: {}", e);
            RepositoryError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                tenant_id: tenant_id.to_string(),
                execution_id: execution_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_next_pending(&self) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT tenant_id, id
                FROM workflow_executions
                WHERE status = 'pending'
                  AND (available_at IS NULL OR available_at <= NOW())
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE workflow_executions e
            SET status = 'running',
                started_at = COALESCE(e.started_at, NOW())
            FROM claimable c
            WHERE e.tenant_id = c.tenant_id AND e.id = c.id
            RETURNING e.id, e.tenant_id, e.workflow_id, e.workflow_version, e.status,
                      e.trigger_type, e.trigger_data, e.created_at, e.started_at,
                      e.completed_at, e.error_message, e.available_at, e.requeue_count
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim pending execution: {}", e);
            RepositoryError::Database(e.to_string())
        })?;

        let claimed = row.as_ref().map(row_to_execution).transpose()?;
        if let Some(execution) = &claimed {
            debug!(execution_id = %execution.id, tenant_id = %execution.tenant_id, "Claimed pending execution");
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn defer(
        &self,
        tenant_id: &str,
        execution_id: &str,
        delay: Duration,
    ) -> Result<(), RepositoryError> {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'pending',
                error_message = NULL,
                started_at = NULL,
                available_at = NOW() + make_interval(secs => $3::double precision / 1000.0),
                requeue_count = requeue_count + 1
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(execution_id)
        .bind(delay_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to defer execution: {}", e);
            RepositoryError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                tenant_id: tenant_id.to_string(),
                execution_id: execution_id.to_string(),
            });
        }
        debug!(delay_ms, "Deferred execution");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail_stale_executions(
        &self,
        older_than: Duration,
        error_message: &str,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE workflow_executions
            SET status = 'failed',
                error_message = $1,
                completed_at = NOW()
            WHERE status IN ('pending', 'running')
              AND created_at < $2
            RETURNING {}
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(error_message)
        .bind(stale_cutoff(older_than))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fail stale executions: {}", e);
            RepositoryError::Database(e.to_string())
        })?;

        rows.iter().map(row_to_execution).collect()
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}
