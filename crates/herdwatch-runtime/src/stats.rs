//! Run counters for ingestion and delivery.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counters, shared across pipelines and dispatch workers.
#[derive(Debug, Default)]
pub struct RunStats {
    frames: AtomicU64,
    dropped_frames: AtomicU64,
    events_finalized: AtomicU64,
    events_discarded: AtomicU64,
    deliveries_sent: AtomicU64,
    deliveries_failed: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one processed frame; returns the running total.
    pub fn record_frame(&self) -> u64 {
        self.frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalized(&self) {
        self.events_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.events_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.deliveries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            events_finalized: self.events_finalized.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            deliveries_sent: self.deliveries_sent.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub dropped_frames: u64,
    pub events_finalized: u64,
    pub events_discarded: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames: {} ({} dropped) | events: {} finalized / {} discarded | deliveries: {} sent / {} failed",
            self.frames,
            self.dropped_frames,
            self.events_finalized,
            self.events_discarded,
            self.deliveries_sent,
            self.deliveries_failed,
        )
    }
}
