//! Queue metrics collector
//!
//! Samples main-queue and dead-letter depths on a fixed interval and keeps
//! the latest snapshot for health reporting.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::transport::{QueueAttributes, QueueTransport};

/// Default sampling interval
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest sampling interval accepted
pub const MIN_METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshots older than this make the queue report unhealthy
pub const METRICS_STALE_AFTER: Duration = Duration::from_secs(300);

/// Depth of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub visible: u64,
    pub in_flight: u64,
    pub delayed: u64,
    pub total: u64,
}

impl From<QueueAttributes> for QueueDepth {
    fn from(attrs: QueueAttributes) -> Self {
        Self {
            visible: attrs.visible,
            in_flight: attrs.in_flight,
            delayed: attrs.delayed,
            total: attrs.total(),
        }
    }
}

/// One sample of queue depths
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub queue: QueueDepth,
    /// `None` when no dead-letter queue is configured or reachable
    pub dead_letter: Option<QueueDepth>,
    /// Set when a configured dead-letter queue could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Health assessment of the latest sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsStatus {
    pub healthy: bool,
    pub queue_depth: u64,
    pub dead_letter_depth: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub issues: Vec<String>,
}

/// Periodic queue depth sampler
pub struct MetricsCollector {
    transport: Arc<dyn QueueTransport>,
    interval: Duration,
    latest: RwLock<Option<QueueMetrics>>,
}

impl MetricsCollector {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            interval: DEFAULT_METRICS_INTERVAL,
            latest: RwLock::new(None),
        }
    }

    /// Sampling interval, clamped to [`MIN_METRICS_INTERVAL`]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_METRICS_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take one sample and store it as the latest snapshot.
    ///
    /// Only a main-queue failure is an error. A dead-letter queue that is
    /// configured but unreachable is recorded in the sample and reported as
    /// an issue by [`status`](Self::status).
    pub async fn collect(&self) -> Result<QueueMetrics, QueueError> {
        let queue = QueueDepth::from(self.transport.get_attributes().await?);

        let (dead_letter, dead_letter_error) =
            match self.transport.get_dead_letter_attributes().await {
                Ok(Some(attrs)) => (Some(QueueDepth::from(attrs)), None),
                Ok(None) => {
                    debug!("No dead-letter queue configured");
                    (None, None)
                }
                Err(e) => {
                    warn!(error = %e, "Dead-letter queue attributes unavailable");
                    (None, Some(e.to_string()))
                }
            };

        let metrics = QueueMetrics {
            queue,
            dead_letter,
            dead_letter_error,
            last_updated: Utc::now(),
        };

        debug!(
            visible = queue.visible,
            in_flight = queue.in_flight,
            delayed = queue.delayed,
            dead_letter = dead_letter.map(|d| d.total).unwrap_or(0),
            "Collected queue metrics"
        );

        *self.latest.write() = Some(metrics.clone());
        Ok(metrics)
    }

    /// Sample on every tick until shutdown is signaled
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "Metrics collector started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.collect().await {
                        error!(error = %e, "Failed to collect queue metrics");
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("Metrics collector: shutdown requested");
                    break;
                }
            }
        }

        debug!("Metrics collector exited");
    }

    pub fn latest(&self) -> Option<QueueMetrics> {
        self.latest.read().clone()
    }

    pub fn is_healthy(&self, max_depth: u64) -> bool {
        self.status(max_depth).healthy
    }

    pub fn status(&self, max_depth: u64) -> MetricsStatus {
        self.status_at(max_depth, Utc::now())
    }

    /// Assess the latest sample as of `now`
    pub fn status_at(&self, max_depth: u64, now: DateTime<Utc>) -> MetricsStatus {
        let Some(metrics) = self.latest() else {
            return MetricsStatus {
                healthy: false,
                queue_depth: 0,
                dead_letter_depth: 0,
                last_updated: None,
                issues: vec!["no queue metrics collected yet".to_string()],
            };
        };

        let dead_letter_depth = metrics.dead_letter.map(|d| d.total).unwrap_or(0);
        let mut issues = Vec::new();

        if let Some(e) = &metrics.dead_letter_error {
            issues.push(format!("dead-letter queue unreachable: {}", e));
        }

        if dead_letter_depth > 0 {
            issues.push(format!(
                "dead-letter queue has {} messages",
                dead_letter_depth
            ));
        }

        if metrics.queue.total > max_depth {
            issues.push(format!(
                "queue depth {} exceeds threshold {}",
                metrics.queue.total, max_depth
            ));
        }

        let age = now
            .signed_duration_since(metrics.last_updated)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > METRICS_STALE_AFTER {
            issues.push(format!(
                "queue metrics are stale (last updated {}s ago)",
                age.as_secs()
            ));
        }

        if !issues.is_empty() {
            warn!(issues = ?issues, "Queue metrics unhealthy");
        }

        MetricsStatus {
            healthy: issues.is_empty(),
            queue_depth: metrics.queue.total,
            dead_letter_depth,
            last_updated: Some(metrics.last_updated),
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryQueue, OutgoingMessage, ReceivedMessage};
    use async_trait::async_trait;
    use flowq_core::MessageAttributes;

    /// Main queue answers, the configured dead-letter queue does not
    struct UnreachableDeadLetter(InMemoryQueue);

    #[async_trait]
    impl QueueTransport for UnreachableDeadLetter {
        async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, QueueError> {
            self.0.send(body, attributes).await
        }
        async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<(), QueueError> {
            self.0.send_batch(messages).await
        }
        async fn receive(&self, max: i32, wait: i32) -> Result<Vec<ReceivedMessage>, QueueError> {
            self.0.receive(max, wait).await
        }
        async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
            self.0.delete(receipt_handle).await
        }
        async fn delete_batch(&self, receipt_handles: &[String]) -> Result<(), QueueError> {
            self.0.delete_batch(receipt_handles).await
        }
        async fn change_visibility(&self, receipt_handle: &str, timeout: i32) -> Result<(), QueueError> {
            self.0.change_visibility(receipt_handle, timeout).await
        }
        async fn get_attributes(&self) -> Result<QueueAttributes, QueueError> {
            self.0.get_attributes().await
        }
        async fn get_dead_letter_attributes(&self) -> Result<Option<QueueAttributes>, QueueError> {
            Err(QueueError::Attributes("access denied".into()))
        }
    }

    #[tokio::test]
    async fn test_status_before_first_sample() {
        let collector = MetricsCollector::new(Arc::new(InMemoryQueue::new("q")));
        let status = collector.status(100);
        assert!(!status.healthy);
        assert_eq!(status.issues.len(), 1);
        assert!(collector.latest().is_none());
    }

    #[tokio::test]
    async fn test_collect_without_dead_letter_queue() {
        let queue = Arc::new(InMemoryQueue::new("q"));
        queue.send("a", &MessageAttributes::new()).await.unwrap();
        queue.send_delayed("b", &MessageAttributes::new(), Duration::from_secs(60));

        let collector = MetricsCollector::new(queue);
        let metrics = collector.collect().await.unwrap();

        assert_eq!(metrics.queue.visible, 1);
        assert_eq!(metrics.queue.delayed, 1);
        assert_eq!(metrics.queue.total, 2);
        assert!(metrics.dead_letter.is_none());
        assert!(collector.is_healthy(10));
    }

    #[tokio::test]
    async fn test_unhealthy_on_depth_and_dead_letters() {
        let dlq = Arc::new(InMemoryQueue::new("dlq"));
        dlq.send("dead", &MessageAttributes::new()).await.unwrap();
        let queue = Arc::new(InMemoryQueue::new("q").with_dead_letter_queue(dlq, 3));
        for i in 0..3 {
            queue.send(&format!("m{}", i), &MessageAttributes::new()).await.unwrap();
        }

        let collector = MetricsCollector::new(queue);
        collector.collect().await.unwrap();

        let status = collector.status(2);
        assert!(!status.healthy);
        assert_eq!(status.queue_depth, 3);
        assert_eq!(status.dead_letter_depth, 1);
        assert_eq!(status.issues.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_dead_letter_queue_is_an_issue() {
        let collector = MetricsCollector::new(Arc::new(UnreachableDeadLetter(InMemoryQueue::new("q"))));
        let metrics = collector.collect().await.unwrap();
        assert!(metrics.dead_letter.is_none());
        assert!(metrics.dead_letter_error.as_deref().unwrap().contains("access denied"));

        let status = collector.status(10);
        assert!(!status.healthy);
        assert_eq!(status.issues.len(), 1);
        assert!(status.issues[0].starts_with("dead-letter queue unreachable"));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let collector = MetricsCollector::new(Arc::new(InMemoryQueue::new("q")))
            .with_interval(Duration::ZERO);
        assert_eq!(collector.interval(), MIN_METRICS_INTERVAL);
    }

    #[tokio::test]
    async fn test_run_with_zero_interval_samples_and_stops() {
        let collector = Arc::new(
            MetricsCollector::new(Arc::new(InMemoryQueue::new("q"))).with_interval(Duration::ZERO),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.run(shutdown_rx).await })
        };

        for _ in 0..100 {
            if collector.latest().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(collector.latest().is_some());
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_unhealthy() {
        let collector = MetricsCollector::new(Arc::new(InMemoryQueue::new("q")));
        collector.collect().await.unwrap();

        assert!(collector.status_at(10, Utc::now()).healthy);

        let later = Utc::now() + chrono::Duration::minutes(6);
        let status = collector.status_at(10, later);
        assert!(!status.healthy);
        assert!(status.issues[0].contains("stale"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let collector = Arc::new(
            MetricsCollector::new(Arc::new(InMemoryQueue::new("q")))
                .with_interval(Duration::from_millis(10)),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(collector.latest().is_some());
    }
}
