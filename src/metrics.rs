//! Lock-free counters for pipeline state (submit/writeback depth and the
//! monotonic sequence numbers the sync fence waits on).
//!
//! Shaped after `WritebackStats`/`MetadataCacheStats` elsewhere in this
//! codebase: plain `Arc<AtomicU64>` fields, relaxed loads for readers, a
//! cheap `Clone` so callers can hold their own handle without touching
//! the cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CacheMetrics {
    /// Sum of sizes of all sets currently in state DIRTY (including those
    /// already WRITEBACK until each member block completes).
    pub nr_dirty: Arc<AtomicI64>,
    /// Blocks currently in flight for writeback.
    pub nr_writeback: Arc<AtomicI64>,
    /// Blocks currently submitted to the transport and awaiting completion.
    pub nr_submitted: Arc<AtomicI64>,
    /// Monotonic counter incremented once per set's first DIRTY transition.
    pub dirty_seq: Arc<AtomicU64>,
    /// Monotonic counter incremented once per set promoted to writeback.
    pub writeback_seq: Arc<AtomicU64>,
    /// Highest seq any sync caller has asked to flush up to.
    pub sync_seq: Arc<AtomicU64>,
    /// Woken whenever `nr_dirty` drops, so callers backed off at the
    /// dirty limit can recheck promptly instead of polling.
    pub dirty_limit_waiters: Arc<Notify>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            nr_dirty: self.nr_dirty.load(Ordering::Relaxed),
            nr_writeback: self.nr_writeback.load(Ordering::Relaxed),
            nr_submitted: self.nr_submitted.load(Ordering::Relaxed),
            dirty_seq: self.dirty_seq.load(Ordering::Relaxed),
            writeback_seq: self.writeback_seq.load(Ordering::Relaxed),
            sync_seq: self.sync_seq.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub nr_dirty: i64,
    pub nr_writeback: i64,
    pub nr_submitted: i64,
    pub dirty_seq: u64,
    pub writeback_seq: u64,
    pub sync_seq: u64,
}
