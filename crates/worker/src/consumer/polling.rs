//! Database-polling consumer
//!
//! Used when the queue is disabled. Each worker claims the oldest claimable
//! execution (the claim marks it running) and hands it to the shared handler.
//! A claim refused by the tenant limiter is deferred by the requeue backoff,
//! so the rows behind it stay claimable.

use std::sync::Arc;
use std::time::Duration;

use flowq_core::{Execution, ExecutionRepository};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{pause, SlotState, SlotStates};
use crate::handler::{ExecutionHandler, ProcessOutcome};

/// Consumer claiming work from the execution store
pub struct PollingConsumer {
    repository: Arc<dyn ExecutionRepository>,
    handler: Arc<ExecutionHandler>,
    poll_interval: Duration,
    process_timeout: Duration,
    slots: Arc<SlotStates>,
}

impl PollingConsumer {
    pub fn new(handler: Arc<ExecutionHandler>, workers: usize) -> Self {
        Self {
            repository: Arc::clone(handler.repository()),
            handler,
            poll_interval: Duration::from_secs(1),
            process_timeout: Duration::from_secs(600),
            slots: Arc::new(SlotStates::new(workers.max(1))),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn slot_states(&self) -> &Arc<SlotStates> {
        &self.slots
    }

    pub fn spawn(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            workers = self.slots.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting polling consumer"
        );

        (0..self.slots.len())
            .map(|slot| {
                let consumer = Arc::clone(&self);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move { consumer.run_slot(slot, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_slot(&self, slot: usize, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(slot, "Polling worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.slots.set(slot, SlotState::Polling);
            let claimed = tokio::select! {
                result = self.repository.claim_next_pending() => result,
                _ = shutdown_rx.changed() => break,
            };

            let idle = match claimed {
                Ok(Some(execution)) => {
                    self.slots.set(slot, SlotState::Dispatching);
                    !self.process(&execution).await
                }
                Ok(None) => true,
                Err(e) => {
                    error!(slot, error = %e, "Failed to claim pending execution");
                    true
                }
            };

            self.slots.set(slot, SlotState::Idle);
            if idle && pause(self.poll_interval, &mut shutdown_rx).await {
                break;
            }
        }

        self.slots.set(slot, SlotState::Stopped);
        debug!(slot, "Polling worker stopped");
    }

    /// Run one claimed execution. Returns false when the worker should idle
    /// before claiming again.
    pub async fn process(&self, execution: &Execution) -> bool {
        let work = self.handler.handle_claimed(execution);

        match tokio::time::timeout(self.process_timeout, work).await {
            Ok(ProcessOutcome::Completed) | Ok(ProcessOutcome::Failed(_)) => true,
            Ok(ProcessOutcome::Requeued(delay)) => {
                match self
                    .repository
                    .defer(&execution.tenant_id, &execution.id, delay)
                    .await
                {
                    // Other tenants' work may be waiting behind it
                    Ok(()) => true,
                    Err(e) => {
                        error!(execution_id = %execution.id, error = %e, "Failed to defer execution");
                        false
                    }
                }
            }
            Err(_) => {
                self.handler
                    .deadline_exceeded(&execution.tenant_id, &execution.id, self.process_timeout)
                    .await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DEADLINE_EXCEEDED_MESSAGE;
    use crate::limiter::{InMemoryTenantLimiter, LimiterConfig, TenantLimiter};
    use crate::stats::WorkerStats;
    use async_trait::async_trait;
    use chrono::Utc;
    use flowq_core::{ExecutionStatus, Executor, ExecutorError};
    use flowq_storage::InMemoryExecutionRepository;

    struct SleepExecutor(Duration);

    #[async_trait]
    impl Executor for SleepExecutor {
        async fn execute(&self, _execution: &Execution) -> Result<(), ExecutorError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn consumer(
        repo: Arc<InMemoryExecutionRepository>,
        limiter: Arc<InMemoryTenantLimiter>,
        delay: Duration,
    ) -> PollingConsumer {
        let handler = Arc::new(ExecutionHandler::new(
            repo,
            Arc::new(SleepExecutor(delay)),
            limiter,
            Arc::new(WorkerStats::new()),
        ));
        PollingConsumer::new(handler, 2).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_workers_drain_pending_executions() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        repo.insert(Execution::pending("e1", "t1", "w1", 1, "webhook"));
        repo.insert(Execution::pending("e2", "t2", "w1", 1, "webhook"));
        let limiter = Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(5)));
        let consumer = Arc::new(consumer(repo.clone(), limiter, Duration::ZERO));

        let (tx, rx) = watch::channel(false);
        let handles = Arc::clone(&consumer).spawn(rx);

        for _ in 0..200 {
            if consumer.handler.stats().processed() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(consumer.handler.stats().processed(), 2);
        assert_eq!(repo.get("t1", "e1").unwrap().status, ExecutionStatus::Completed);
        assert_eq!(repo.get("t2", "e2").unwrap().status, ExecutionStatus::Completed);
        assert_eq!(
            consumer.slot_states().snapshot(),
            vec![SlotState::Stopped, SlotState::Stopped]
        );
    }

    #[tokio::test]
    async fn test_capacity_conflict_defers_execution_by_backoff() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        repo.insert(Execution::pending("e1", "t1", "w1", 1, "webhook"));
        let limiter = Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(1)));
        assert!(limiter.acquire("t1", "busy").await.unwrap());
        let consumer = consumer(repo.clone(), limiter, Duration::ZERO);

        let claimed = repo.claim_next_pending().await.unwrap().unwrap();
        assert!(consumer.process(&claimed).await);

        let deferred = repo.get("t1", "e1").unwrap();
        assert_eq!(deferred.status, ExecutionStatus::Pending);
        assert_eq!(deferred.requeue_count, 1);
        let hidden_for = deferred.available_at.unwrap() - Utc::now();
        assert!(hidden_for > chrono::Duration::seconds(25));
        assert!(hidden_for <= chrono::Duration::seconds(30));
        assert!(repo.claim_next_pending().await.unwrap().is_none());

        assert_eq!(consumer.handler.stats().failed(), 0);
        assert_eq!(consumer.handler.stats().capacity_conflicts(), 1);
    }

    #[tokio::test]
    async fn test_tenant_at_capacity_does_not_block_other_tenants() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let now = Utc::now();
        repo.insert(
            Execution::pending("e1", "t1", "w1", 1, "webhook")
                .with_created_at(now - chrono::Duration::seconds(60)),
        );
        repo.insert(Execution::pending("e2", "t2", "w1", 1, "webhook").with_created_at(now));
        let limiter = Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(1)));
        assert!(limiter.acquire("t1", "busy").await.unwrap());

        let handler = Arc::new(ExecutionHandler::new(
            repo.clone(),
            Arc::new(SleepExecutor(Duration::ZERO)),
            limiter,
            Arc::new(WorkerStats::new()),
        ));
        let consumer = Arc::new(
            PollingConsumer::new(handler, 1).with_poll_interval(Duration::from_millis(10)),
        );

        let (tx, rx) = watch::channel(false);
        let handles = Arc::clone(&consumer).spawn(rx);
        for _ in 0..200 {
            if consumer.handler.stats().processed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.get("t2", "e2").unwrap().status, ExecutionStatus::Completed);
        let e1 = repo.get("t1", "e1").unwrap();
        assert_eq!(e1.status, ExecutionStatus::Pending);
        assert_eq!(e1.requeue_count, 1);
        // One refusal, then the execution waits out its backoff
        assert_eq!(consumer.handler.stats().capacity_conflicts(), 1);
    }

    #[tokio::test]
    async fn test_deadline_marks_execution_failed() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        repo.insert(Execution::pending("e1", "t1", "w1", 1, "webhook"));
        let limiter = Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(1)));
        let consumer = consumer(repo.clone(), limiter, Duration::from_secs(30))
            .with_process_timeout(Duration::from_millis(50));

        let claimed = repo.claim_next_pending().await.unwrap().unwrap();
        assert!(consumer.process(&claimed).await);

        let execution = repo.get("t1", "e1").unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_message.as_deref(), Some(DEADLINE_EXCEEDED_MESSAGE));
        assert_eq!(consumer.handler.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_workers() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let limiter = Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(1)));
        let consumer = Arc::new(
            consumer(repo, limiter, Duration::ZERO).with_poll_interval(Duration::from_secs(60)),
        );

        let (tx, rx) = watch::channel(false);
        let handles = Arc::clone(&consumer).spawn(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(handles)).await;
        assert!(joined.is_ok());
    }
}
