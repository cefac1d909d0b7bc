//! Queued subscriber metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a single queued subscriber
#[derive(Debug, Default)]
pub struct SubscriberMetrics {
    /// Samples accepted into the queue
    delivered_count: AtomicU64,
    /// Samples dropped because the queue was full
    dropped_count: AtomicU64,
    /// Samples dropped because the receiver was gone
    closed_count: AtomicU64,
}

impl SubscriberMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    pub fn inc_delivered_count(&self) {
        self.delivered_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Increment dropped count, returning the new total
    pub fn inc_dropped_count(&self) -> u64 {
        self.dropped_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn closed_count(&self) -> u64 {
        self.closed_count.load(Ordering::Relaxed)
    }

    pub fn inc_closed_count(&self) {
        self.closed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered_count: self.delivered_count(),
            dropped_count: self.dropped_count(),
            closed_count: self.closed_count(),
        }
    }
}

/// Snapshot of subscriber metrics (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub delivered_count: u64,
    pub dropped_count: u64,
    pub closed_count: u64,
}
