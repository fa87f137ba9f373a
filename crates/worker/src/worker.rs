//! Worker orchestrator
//!
//! Wires the handler into the consumer for the configured mode and owns the
//! background tasks: consumer slots, queue metrics (queue mode) and the stale
//! execution watchdog. Shutdown flips readiness off before anything stops.

use std::sync::Arc;

use axum::Router;
use flowq_core::{ExecutionRepository, Executor};
use flowq_queue::{ConfigError, MetricsCollector, QueueTransport};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{WorkerConfig, WorkerMode};
use crate::consumer::{Consumer, PollingConsumer, QueueConsumer};
use crate::error::Result;
use crate::handler::ExecutionHandler;
use crate::health::{self, HealthState, LimiterCheck, QueueCheck, RepositoryCheck};
use crate::limiter::TenantLimiter;
use crate::stats::WorkerStats;
use crate::watchdog::StaleExecutionWatchdog;

/// Collaborators the worker runs against
pub struct WorkerDeps {
    pub repository: Arc<dyn ExecutionRepository>,
    pub executor: Arc<dyn Executor>,
    pub limiter: Arc<dyn TenantLimiter>,
    /// Required in queue mode
    pub transport: Option<Arc<dyn QueueTransport>>,
}

pub struct Worker {
    config: WorkerConfig,
    consumer: Consumer,
    stats: Arc<WorkerStats>,
    repository: Arc<dyn ExecutionRepository>,
    limiter: Arc<dyn TenantLimiter>,
    transport: Option<Arc<dyn QueueTransport>>,
    metrics: Option<Arc<MetricsCollector>>,
    health: HealthState,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(WorkerStats::new());
        let handler = Arc::new(ExecutionHandler::new(
            Arc::clone(&deps.repository),
            deps.executor,
            Arc::clone(&deps.limiter),
            Arc::clone(&stats),
        ));

        let (consumer, metrics) = match config.mode() {
            WorkerMode::Queue => {
                let transport = deps.transport.clone().ok_or_else(|| {
                    ConfigError::Invalid("queue mode requires a queue transport".into())
                })?;
                let metrics = MetricsCollector::new(Arc::clone(&transport))
                    .with_interval(config.metrics_interval);
                let consumer = QueueConsumer::new(transport, handler, config.queue.clone());
                (Consumer::Queue(Arc::new(consumer)), Some(Arc::new(metrics)))
            }
            WorkerMode::Polling => {
                let consumer = PollingConsumer::new(handler, config.concurrency)
                    .with_poll_interval(config.queue.poll_interval)
                    .with_process_timeout(config.queue.process_timeout);
                (Consumer::Polling(Arc::new(consumer)), None)
            }
        };

        let mut health = HealthState::new(
            config.worker_id.clone(),
            consumer.mode(),
            config.capacity(),
            Arc::clone(&stats),
        )
        .with_slots(Arc::clone(consumer.slot_states()));
        if config.database_url.is_some() {
            health = health.with_check(Arc::new(RepositoryCheck(Arc::clone(&deps.repository))));
        }
        if config.redis_url.is_some() {
            health = health.with_check(Arc::new(LimiterCheck(Arc::clone(&deps.limiter))));
        }
        if let Some(transport) = &deps.transport {
            health = health.with_check(Arc::new(QueueCheck(Arc::clone(transport))));
        }
        if let Some(collector) = &metrics {
            health = health.with_metrics(Arc::clone(collector), config.max_queue_depth);
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            consumer,
            stats,
            repository: deps.repository,
            limiter: deps.limiter,
            transport: deps.transport,
            metrics,
            health,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn mode(&self) -> WorkerMode {
        self.consumer.mode()
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Health routes bound to this worker's state
    pub fn health_router(&self) -> Router {
        health::router(self.health.clone())
    }

    /// Check every dependency once
    pub async fn check_dependencies(&self) -> Result<()> {
        self.repository.ping().await?;
        self.limiter.ping().await?;
        if let Some(transport) = &self.transport {
            transport.get_attributes().await?;
        }
        Ok(())
    }

    /// Spawn the background tasks and mark the worker ready
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("Worker already started");
            return;
        }

        info!(
            worker_id = %self.config.worker_id,
            mode = %self.mode(),
            capacity = self.config.capacity(),
            tenant_max_concurrent = self.config.tenant_max_concurrent,
            "Starting worker"
        );

        handles.extend(self.consumer.spawn(self.shutdown_tx.subscribe()));

        if let Some(collector) = &self.metrics {
            let collector = Arc::clone(collector);
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move { collector.run(shutdown_rx).await }));
        }

        let watchdog = StaleExecutionWatchdog::new(Arc::clone(&self.repository))
            .with_interval(self.config.stale_check_interval)
            .with_stale_after(self.config.stale_after);
        let shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { watchdog.run(shutdown_rx).await }));

        self.health.set_ready(true);
        info!("Worker ready");
    }

    /// Stop taking work and wait for in-flight executions.
    ///
    /// Readiness is cleared first. Tasks still running after the shutdown
    /// timeout are aborted. Returns true when everything drained in time.
    pub async fn shutdown(&self) -> bool {
        self.health.set_ready(false);
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return true;
        }

        info!(
            active = self.stats.active(),
            timeout_secs = self.config.shutdown_timeout.as_secs(),
            "Draining worker"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await
        {
            Ok(_) => {
                info!(
                    processed = self.stats.processed(),
                    failed = self.stats.failed(),
                    "Worker stopped"
                );
                true
            }
            Err(_) => {
                warn!(
                    active = self.stats.active(),
                    "Shutdown timeout reached, aborting in-flight work"
                );
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}
