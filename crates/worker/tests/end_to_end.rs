//! Queue and polling mode scenarios against the in-process queue emulator

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowq_core::{
    Execution, ExecutionMessage, ExecutionStatus, Executor, ExecutorError, MessageAttributes,
};
use flowq_queue::{
    ExecutionPublisher, InMemoryQueue, OutgoingMessage, Publisher, QueueAttributes, QueueConfig,
    QueueError, QueueTransport, ReceivedMessage,
};
use flowq_storage::InMemoryExecutionRepository;
use flowq_worker::{
    ExecutionHandler, InMemoryTenantLimiter, LimiterConfig, QueueConsumer, TenantLimiter, Worker,
    WorkerConfig, WorkerDeps, WorkerStats,
};
use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Delete(String),
    ChangeVisibility(String, i32),
}

/// Emulator wrapper that records settle calls
struct RecordingTransport {
    inner: InMemoryQueue,
    calls: Mutex<Vec<Call>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            inner: InMemoryQueue::new("executions"),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl QueueTransport for RecordingTransport {
    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, QueueError> {
        self.inner.send(body, attributes).await
    }

    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<(), QueueError> {
        self.inner.send_batch(messages).await
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.inner.receive(max_messages, wait_seconds).await
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.calls.lock().push(Call::Delete(receipt_handle.to_string()));
        self.inner.delete(receipt_handle).await
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<(), QueueError> {
        self.inner.delete_batch(receipt_handles).await
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout_seconds: i32,
    ) -> Result<(), QueueError> {
        self.calls
            .lock()
            .push(Call::ChangeVisibility(receipt_handle.to_string(), timeout_seconds));
        self.inner.change_visibility(receipt_handle, timeout_seconds).await
    }

    async fn get_attributes(&self) -> Result<QueueAttributes, QueueError> {
        self.inner.get_attributes().await
    }

    async fn get_dead_letter_attributes(&self) -> Result<Option<QueueAttributes>, QueueError> {
        self.inner.get_dead_letter_attributes().await
    }
}

struct OkExecutor;

#[async_trait]
impl Executor for OkExecutor {
    async fn execute(&self, _execution: &Execution) -> Result<(), ExecutorError> {
        Ok(())
    }
}

struct Harness {
    transport: Arc<RecordingTransport>,
    repo: Arc<InMemoryExecutionRepository>,
    limiter: Arc<InMemoryTenantLimiter>,
    stats: Arc<WorkerStats>,
    consumer: Arc<QueueConsumer>,
}

fn harness(max_per_tenant: usize) -> Harness {
    let transport = Arc::new(RecordingTransport::new());
    let repo = Arc::new(InMemoryExecutionRepository::new());
    let limiter = Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(max_per_tenant)));
    let stats = Arc::new(WorkerStats::new());
    let handler = Arc::new(ExecutionHandler::new(
        repo.clone(),
        Arc::new(OkExecutor),
        limiter.clone(),
        stats.clone(),
    ));
    let config = QueueConfig::default()
        .with_queue_url("memory://executions")
        .with_wait_time_seconds(1)
        .with_concurrent_workers(1);
    let consumer = Arc::new(QueueConsumer::new(transport.clone(), handler, config));

    Harness {
        transport,
        repo,
        limiter,
        stats,
        consumer,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn stop(tx: watch::Sender<bool>, handles: Vec<tokio::task::JoinHandle<()>>) {
    tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[test_log::test(tokio::test)]
async fn test_message_is_processed_once_and_deleted() {
    let h = harness(5);
    h.repo.insert(Execution::pending("e1", "t1", "w1", 1, "webhook"));

    let publisher = Publisher::new(h.transport.clone());
    publisher
        .publish_execution(&ExecutionMessage::new("e1", "t1", "w1", 1, "webhook"))
        .await
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let handles = h.consumer.clone().spawn(rx);
    let stats = h.stats.clone();
    wait_for(|| stats.processed() == 1).await;
    stop(tx, handles).await;

    assert_eq!(h.stats.processed(), 1);
    assert_eq!(h.stats.failed(), 0);
    assert_eq!(h.repo.get("t1", "e1").unwrap().status, ExecutionStatus::Completed);
    assert!(h.transport.inner.is_empty());

    let deletes = h
        .transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Delete(_)))
        .count();
    assert_eq!(deletes, 1);
}

#[test_log::test(tokio::test)]
async fn test_tenant_at_capacity_extends_visibility_without_failure() {
    let h = harness(1);
    h.repo.insert(Execution::pending("e2", "t1", "w1", 1, "webhook"));
    assert!(h.limiter.acquire("t1", "e1").await.unwrap());

    let publisher = Publisher::new(h.transport.clone());
    publisher
        .publish_execution(&ExecutionMessage::new("e2", "t1", "w1", 1, "webhook"))
        .await
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let handles = h.consumer.clone().spawn(rx);
    let stats = h.stats.clone();
    wait_for(|| stats.capacity_conflicts() == 1).await;
    stop(tx, handles).await;

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], Call::ChangeVisibility(_, 30)));

    // Still queued, hidden for the backoff, not failed
    assert_eq!(h.transport.inner.len(), 1);
    assert!(h.transport.inner.receive(1, 0).await.unwrap().is_empty());
    assert_eq!(h.stats.failed(), 0);
    assert_eq!(h.stats.processed(), 0);
    assert_eq!(h.repo.get("t1", "e2").unwrap().status, ExecutionStatus::Pending);
    assert_eq!(h.limiter.current_count("t1").await.unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn test_polling_worker_runs_pending_executions() {
    let repo = Arc::new(InMemoryExecutionRepository::new());
    for id in ["e1", "e2", "e3"] {
        repo.insert(Execution::pending(id, "t1", "w1", 1, "schedule"));
    }

    let worker = Worker::new(
        WorkerConfig::default().with_concurrency(2),
        WorkerDeps {
            repository: repo.clone(),
            executor: Arc::new(OkExecutor),
            limiter: Arc::new(InMemoryTenantLimiter::new(LimiterConfig::new(1))),
            transport: None,
        },
    )
    .unwrap();

    worker.start();
    let stats = worker.stats().clone();
    wait_for(|| stats.processed() == 3).await;
    assert!(worker.shutdown().await);

    for id in ["e1", "e2", "e3"] {
        assert_eq!(repo.get("t1", id).unwrap().status, ExecutionStatus::Completed);
    }
    assert_eq!(worker.stats().failed(), 0);
}
