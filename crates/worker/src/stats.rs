//! Worker runtime counters
//!
//! Process-local, reset on restart. Owned by the orchestrator and shared
//! with the handler and the health server through an `Arc`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Active, processed, failed and capacity-conflict counters
#[derive(Debug, Default)]
pub struct WorkerStats {
    active: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    capacity_conflicts: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub active: usize,
    pub processed: u64,
    pub failed: u64,
    pub capacity_conflicts: u64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one execution active until the guard drops
    pub fn start(&self) -> ActiveGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard { stats: self }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_conflict(&self) {
        self.capacity_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn capacity_conflicts(&self) -> u64 {
        self.capacity_conflicts.load(Ordering::Relaxed)
    }

    /// Whether active executions have reached `capacity`
    pub fn is_at_capacity(&self, capacity: usize) -> bool {
        self.active() >= capacity
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            active: self.active(),
            processed: self.processed(),
            failed: self.failed(),
            capacity_conflicts: self.capacity_conflicts(),
        }
    }
}

/// Decrements the active count on drop
pub struct ActiveGuard<'a> {
    stats: &'a WorkerStats,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}
