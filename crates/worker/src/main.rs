use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use flowq_core::telemetry::{init_telemetry, TelemetryConfig};
use flowq_core::{ExecutionRepository, Executor};
use flowq_queue::QueueTransport;
use flowq_storage::{InMemoryExecutionRepository, PostgresExecutionRepository};
use flowq_worker::{
    HttpExecutor, InMemoryTenantLimiter, LimiterConfig, TenantLimiter, Worker, WorkerConfig,
    WorkerDeps, WorkerMode,
};

/// Per-request timeout for the executor endpoint
const EXECUTOR_TIMEOUT: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - SERVICE_NAME: Service name (default: "flowq-worker")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - LOG_FORMAT: "json" for structured output
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "flowq" {
        telemetry_config.service_name = "flowq-worker".to_string();
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    init_telemetry(telemetry_config);

    let config = WorkerConfig::from_env();
    config.validate().context("Invalid worker configuration")?;

    tracing::info!(
        worker_id = %config.worker_id,
        mode = %config.mode(),
        "flowq-worker starting..."
    );

    let repository = connect_repository(&config)?;
    let limiter = connect_limiter(&config)?;
    let executor = build_executor(&config)?;
    let transport = connect_transport(&config).await?;

    let worker = Arc::new(
        Worker::new(
            config.clone(),
            WorkerDeps {
                repository,
                executor,
                limiter,
                transport,
            },
        )
        .context("Failed to create worker")?,
    );

    if let Err(e) = worker.check_dependencies().await {
        // Keep running; the health endpoint reports the dependency as down
        tracing::warn!(error = %e, "Dependency check failed at startup");
    }

    let listener = tokio::net::TcpListener::bind(&config.health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", config.health_addr))?;
    tracing::info!(addr = %config.health_addr, "Health server listening");

    let (server_stop_tx, server_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let app = worker.health_router();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_stop_rx.await;
            })
            .await
    });

    worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    if !worker.shutdown().await {
        tracing::warn!("In-flight executions did not finish before the shutdown timeout");
    }

    let _ = server_stop_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Health server error"),
        Err(e) => tracing::error!(error = %e, "Health server task failed"),
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Delay between migration attempts while the database is unreachable
const MIGRATION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// The pool connects on first use; an unreachable database is reported by
/// the health check while migrations keep retrying in the background.
fn connect_repository(config: &WorkerConfig) -> Result<Arc<dyn ExecutionRepository>> {
    match &config.database_url {
        Some(url) => {
            let repository = PostgresExecutionRepository::connect_lazy(url)
                .context("Invalid DATABASE_URL")?;
            tokio::spawn(migrate_until_applied(repository.clone()));
            tracing::info!("Using PostgreSQL execution store");
            Ok(Arc::new(repository))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory execution store");
            Ok(Arc::new(InMemoryExecutionRepository::new()))
        }
    }
}

async fn migrate_until_applied(repository: PostgresExecutionRepository) {
    loop {
        match repository.migrate().await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_secs = MIGRATION_RETRY_INTERVAL.as_secs(),
                    "Database migrations failed, retrying"
                );
                tokio::time::sleep(MIGRATION_RETRY_INTERVAL).await;
            }
        }
    }
}

/// Redis is connected on first use, like the database pool
#[cfg(feature = "redis")]
fn connect_limiter(config: &WorkerConfig) -> Result<Arc<dyn TenantLimiter>> {
    let limiter_config = LimiterConfig::new(config.tenant_max_concurrent);
    match &config.redis_url {
        Some(url) => {
            let limiter = flowq_worker::RedisTenantLimiter::new(url, limiter_config)
                .context("Invalid REDIS_URL")?;
            Ok(Arc::new(limiter))
        }
        None => Ok(local_limiter(limiter_config)),
    }
}

#[cfg(not(feature = "redis"))]
fn connect_limiter(config: &WorkerConfig) -> Result<Arc<dyn TenantLimiter>> {
    if config.redis_url.is_some() {
        bail!("REDIS_URL is set but this build has no redis support");
    }
    Ok(local_limiter(LimiterConfig::new(config.tenant_max_concurrent)))
}

fn local_limiter(config: LimiterConfig) -> Arc<dyn TenantLimiter> {
    tracing::warn!("REDIS_URL not set, tenant limits apply to this process only");
    Arc::new(InMemoryTenantLimiter::new(config))
}

fn build_executor(config: &WorkerConfig) -> Result<Arc<dyn Executor>> {
    let Some(url) = &config.executor_url else {
        bail!("EXECUTOR_URL is required to run executions");
    };
    let executor = HttpExecutor::new(url.clone(), EXECUTOR_TIMEOUT)
        .context("Failed to create executor client")?;
    Ok(Arc::new(executor))
}

#[cfg(feature = "sqs")]
async fn connect_transport(config: &WorkerConfig) -> Result<Option<Arc<dyn QueueTransport>>> {
    if config.mode() != WorkerMode::Queue {
        return Ok(None);
    }

    let transport = flowq_queue::SqsTransport::connect(&config.queue)
        .await
        .context("Failed to create queue client")?;
    tracing::info!(queue_url = %transport.queue_url(), "Using SQS transport");
    Ok(Some(Arc::new(transport)))
}

#[cfg(not(feature = "sqs"))]
async fn connect_transport(config: &WorkerConfig) -> Result<Option<Arc<dyn QueueTransport>>> {
    if config.mode() == WorkerMode::Queue {
        bail!("QUEUE_ENABLED is set but this build has no queue support");
    }
    Ok(None)
}
