//! Requeue backoff
//!
//! A capacity conflict does not delete or re-send the message. It extends the
//! message's invisibility by `min(300, 30 * 2^retry_count)` seconds, so the same
//! queue message comes back later.

use std::time::Duration;

use tracing::info;

use crate::error::QueueError;
use crate::transport::QueueTransport;

/// First requeue delay
pub const BASE_DELAY: Duration = Duration::from_secs(30);

/// Upper bound for every requeue delay
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// Requeue delay for a retry count: 30s, 60s, 120s, 240s, then 300s.
///
/// Monotonically non-decreasing and bounded by [`MAX_DELAY`] for every input.
pub fn requeue_delay(retry_count: u32) -> Duration {
    RequeuePolicy::default().delay_for_retry(retry_count)
}

/// Exponential requeue schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            initial_interval: BASE_DELAY,
            max_interval: MAX_DELAY,
        }
    }
}

impl RequeuePolicy {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Delay for a 0-based retry count, doubling per retry up to the cap
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.initial_interval.checked_mul(factor))
            .map_or(self.max_interval, |delay| delay.min(self.max_interval))
    }
}

/// Retry count used for the backoff of a delivery.
///
/// The in-message counter is producer metadata; the queue's receive count
/// advances on every redelivery of the same message, so repeated capacity
/// conflicts keep backing off even when the body is never rewritten.
pub fn effective_retry_count(retry_count: u32, receive_count: u32) -> u32 {
    retry_count.max(receive_count.saturating_sub(1))
}

/// Hide a delivery for the backoff delay of `retry_count`.
///
/// Returns the applied delay.
pub async fn requeue(
    transport: &dyn QueueTransport,
    receipt_handle: &str,
    retry_count: u32,
) -> Result<Duration, QueueError> {
    let delay = requeue_delay(retry_count);
    extend_visibility(transport, receipt_handle, delay).await?;
    Ok(delay)
}

/// Hide a delivery for `delay` (whole seconds) without deleting it
pub async fn extend_visibility(
    transport: &dyn QueueTransport,
    receipt_handle: &str,
    delay: Duration,
) -> Result<(), QueueError> {
    let seconds = i32::try_from(delay.as_secs()).unwrap_or(i32::MAX);
    transport.change_visibility(receipt_handle, seconds).await?;

    info!(delay_secs = delay.as_secs(), "Message requeued with backoff");
    Ok(())
}
