use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lifetime counters for one engine instance.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    enqueued: AtomicU64,
    reenqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    exceptions: AtomicU64,
    dropped: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reenqueued(&self) {
        self.reenqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> MetricsCounters {
        MetricsCounters {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            reenqueued: self.reenqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsCounters {
    pub enqueued: u64,
    pub reenqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub exceptions: u64,
    pub dropped: u64,
}

/// Per-function row, also the shape of one admin `status` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub function: String,
    pub total: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub running: usize,
    pub available_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: MetricsCounters,
    /// Entries waiting in any queue.
    pub pending: usize,
    /// Jobs currently assigned to a worker.
    pub active: usize,
    pub workers: usize,
    pub queues: Vec<QueueSnapshot>,
}
