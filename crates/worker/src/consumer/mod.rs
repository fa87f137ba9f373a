//! Work consumers
//!
//! The operating mode is a variant chosen once at construction:
//! - [`QueueConsumer`] - N slots long-polling the queue transport
//! - [`PollingConsumer`] - N workers claiming pending executions from the store
//!
//! Each slot moves `idle -> polling -> dispatching -> idle` and ends in
//! `stopped` once shutdown is signaled.

mod polling;
mod queue;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use polling::PollingConsumer;
pub use queue::QueueConsumer;

use crate::config::WorkerMode;

/// Lifecycle state of one consumer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Idle,
    Polling,
    Dispatching,
    Stopped,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotState::Polling,
            2 => SlotState::Dispatching,
            3 => SlotState::Stopped,
            _ => SlotState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SlotState::Idle => 0,
            SlotState::Polling => 1,
            SlotState::Dispatching => 2,
            SlotState::Stopped => 3,
        }
    }
}

/// Shared view of every slot's state
#[derive(Debug)]
pub struct SlotStates {
    slots: Vec<AtomicU8>,
}

impl SlotStates {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| AtomicU8::new(SlotState::Idle.as_u8())).collect(),
        }
    }

    pub fn set(&self, slot: usize, state: SlotState) {
        if let Some(cell) = self.slots.get(slot) {
            cell.store(state.as_u8(), Ordering::Relaxed);
        }
    }

    pub fn get(&self, slot: usize) -> Option<SlotState> {
        self.slots
            .get(slot)
            .map(|cell| SlotState::from_u8(cell.load(Ordering::Relaxed)))
    }

    pub fn snapshot(&self) -> Vec<SlotState> {
        self.slots
            .iter()
            .map(|cell| SlotState::from_u8(cell.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The consumer for the configured mode
pub enum Consumer {
    Queue(Arc<QueueConsumer>),
    Polling(Arc<PollingConsumer>),
}

impl Consumer {
    pub fn mode(&self) -> WorkerMode {
        match self {
            Consumer::Queue(_) => WorkerMode::Queue,
            Consumer::Polling(_) => WorkerMode::Polling,
        }
    }

    /// Spawn one task per slot; each stops when shutdown is signaled
    pub fn spawn(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        match self {
            Consumer::Queue(consumer) => Arc::clone(consumer).spawn(shutdown_rx),
            Consumer::Polling(consumer) => Arc::clone(consumer).spawn(shutdown_rx),
        }
    }

    pub fn slot_states(&self) -> &Arc<SlotStates> {
        match self {
            Consumer::Queue(consumer) => consumer.slot_states(),
            Consumer::Polling(consumer) => consumer.slot_states(),
        }
    }
}

/// Sleep for `duration` unless shutdown arrives first. Returns true on shutdown.
pub(crate) async fn pause(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown_rx.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_states() {
        let states = SlotStates::new(2);
        assert_eq!(states.snapshot(), vec![SlotState::Idle, SlotState::Idle]);

        states.set(0, SlotState::Polling);
        states.set(1, SlotState::Dispatching);
        states.set(7, SlotState::Stopped);

        assert_eq!(states.get(0), Some(SlotState::Polling));
        assert_eq!(states.get(1), Some(SlotState::Dispatching));
        assert_eq!(states.get(7), None);
        assert_eq!(states.len(), 2);
    }

    #[tokio::test]
    async fn test_pause_returns_early_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let start = std::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        assert!(pause(Duration::from_secs(30), &mut rx).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
