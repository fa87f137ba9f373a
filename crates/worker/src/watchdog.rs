//! Stale execution watchdog
//!
//! Periodically fails executions stuck in `pending` or `running` longer than
//! the stale threshold, e.g. after a worker crashed mid-run.

use std::sync::Arc;
use std::time::Duration;

use flowq_core::{ExecutionRepository, RepositoryError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Error recorded on executions failed by the watchdog
pub const STALE_ERROR_MESSAGE: &str = "execution timeout";

pub struct StaleExecutionWatchdog {
    repository: Arc<dyn ExecutionRepository>,
    interval: Duration,
    stale_after: Duration,
}

impl StaleExecutionWatchdog {
    pub fn new(repository: Arc<dyn ExecutionRepository>) -> Self {
        Self {
            repository,
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(3600),
        }
    }

    /// Sweep interval; a zero interval is raised to one millisecond
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Fail every stale execution once. Returns how many were failed.
    pub async fn sweep(&self) -> Result<usize, RepositoryError> {
        let failed = self
            .repository
            .fail_stale_executions(self.stale_after, STALE_ERROR_MESSAGE)
            .await?;

        for execution in &failed {
            warn!(
                tenant_id = %execution.tenant_id,
                execution_id = %execution.id,
                created_at = %execution.created_at,
                "Failed stale execution"
            );
        }
        if failed.is_empty() {
            debug!("No stale executions");
        } else {
            info!(count = failed.len(), "Stale executions failed");
        }
        Ok(failed.len())
    }

    /// Sweep on every tick until shutdown
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            "Starting stale execution watchdog"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Stale execution sweep failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Stale execution watchdog shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowq_core::{Execution, ExecutionStatus};
    use flowq_storage::InMemoryExecutionRepository;

    fn aged(id: &str, age: chrono::Duration) -> Execution {
        Execution::pending(id, "t1", "w1", 1, "schedule").with_created_at(Utc::now() - age)
    }

    #[tokio::test]
    async fn test_sweep_fails_only_stale_executions() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        repo.insert(aged("old", chrono::Duration::hours(2)));
        repo.insert(aged("fresh", chrono::Duration::minutes(5)));
        let mut done = aged("done", chrono::Duration::hours(3));
        done.transition(ExecutionStatus::Completed, None);
        repo.insert(done);

        let watchdog = StaleExecutionWatchdog::new(repo.clone());
        assert_eq!(watchdog.sweep().await.unwrap(), 1);

        let old = repo.get("t1", "old").unwrap();
        assert_eq!(old.status, ExecutionStatus::Failed);
        assert_eq!(old.error_message.as_deref(), Some(STALE_ERROR_MESSAGE));
        assert_eq!(repo.get("t1", "fresh").unwrap().status, ExecutionStatus::Pending);
        assert_eq!(repo.get("t1", "done").unwrap().status, ExecutionStatus::Completed);

        // Nothing left on the second pass
        assert_eq!(watchdog.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_sweeps_and_stops() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        repo.insert(aged("old", chrono::Duration::hours(2)));
        let watchdog = StaleExecutionWatchdog::new(repo.clone())
            .with_interval(Duration::from_millis(10));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { watchdog.run(rx).await });

        for _ in 0..100 {
            if repo.get("t1", "old").unwrap().status == ExecutionStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(repo.get("t1", "old").unwrap().status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let watchdog = StaleExecutionWatchdog::new(repo).with_interval(Duration::from_secs(60));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { watchdog.run(rx).await });
        drop(tx);

        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_panic() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let watchdog = StaleExecutionWatchdog::new(repo).with_interval(Duration::ZERO);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { watchdog.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
