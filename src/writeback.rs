//! C5 — writeback pipeline: decides when a dirty set is ready to flush
//! and submits its members, grounded on `should_writeback` and the
//! DIRTYING/WRITEBACK handshake in `original_source/shared/block.c`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::WRITEBACK_THRESH;
use crate::dirty_set::{DirtySet, SET_WRITEBACK};
use crate::intake::Intake;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::submit::{SubmitPipeline, SubmitRequest};
use crate::transport::BlockOp;

/// A set is ready to writeback if the backlog has grown past the
/// threshold, or if some sync call is waiting on a sequence number this
/// set would satisfy.
fn should_writeback(snapshot: &CacheMetricsSnapshot, synced_up_to: u64, set_seq: u64) -> bool {
    snapshot.nr_dirty - snapshot.nr_writeback >= WRITEBACK_THRESH as i64 || set_seq <= synced_up_to
}

pub struct WritebackPipeline {
    intake: Intake<Arc<DirtySet>>,
    pending: Mutex<VecDeque<Arc<DirtySet>>>,
    /// Shared with the dirty grouper (C8): serializes "merge a block into
    /// this set" against "promote this set to WRITEBACK" so a set can
    /// never be claimed for flushing while a merge is mid-transplant into
    /// it, and a merge can never transplant into a set that just got
    /// claimed.
    merge_lock: Arc<Mutex<()>>,
}

impl WritebackPipeline {
    pub fn new(merge_lock: Arc<Mutex<()>>) -> Self {
        Self {
            intake: Intake::new(),
            pending: Mutex::new(VecDeque::new()),
            merge_lock,
        }
    }

    /// Nominate a freshly DIRTY set for eventual writeback. Called by the
    /// dirty grouper (C8) right after a DIRTYING -> DIRTY promotion.
    pub fn nominate(&self, set: Arc<DirtySet>) {
        self.intake.push(set);
    }

    pub async fn run(
        &self,
        submit: Arc<SubmitPipeline>,
        metrics: CacheMetrics,
        synced_seq: Arc<AtomicU64>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.intake.wait_for_kick() => {}
                _ = tokio::time::sleep(tick) => {}
            }

            for set in self.intake.drain_all() {
                self.pending.lock().unwrap().push_back(set);
            }

            self.flush_ready(&submit, &metrics, synced_seq.load(Ordering::Relaxed));
        }
    }

    fn flush_ready(&self, submit: &SubmitPipeline, metrics: &CacheMetrics, synced_up_to: u64) {
        let snapshot = metrics.snapshot();
        let mut pending = self.pending.lock().unwrap();
        let mut ready = Vec::new();
        pending.retain(|set| {
            if should_writeback(&snapshot, synced_up_to, set.seq()) {
                ready.push(set.clone());
                false
            } else {
                true
            }
        });
        drop(pending);

        for set in ready {
            promote(&set, submit, metrics, &self.merge_lock);
        }
    }
}

/// Claim a set for writeback and submit every member. Takes the lock
/// shared with the dirty grouper so a merge already in progress against
/// this set finishes (or backs off) before the set's membership is
/// snapshotted here — the flip to `SET_WRITEBACK` and the membership
/// snapshot happen atomically with respect to merging.
fn promote(set: &Arc<DirtySet>, submit: &SubmitPipeline, metrics: &CacheMetrics, merge_lock: &Mutex<()>) {
    let _guard = merge_lock.lock().unwrap();
    if set.bits.test_and_set(SET_WRITEBACK) {
        // Already claimed (e.g. a concurrent forced promotion from
        // dirty_begin while merging a would-overflow set out of the way).
        return;
    }
    let members = set.members_snapshot();
    metrics.nr_writeback.fetch_add(members.len() as i64, Ordering::Relaxed);
    metrics.writeback_seq.fetch_max(set.seq(), Ordering::Relaxed);
    trace!(seq = set.seq(), members = members.len(), "promoting set to writeback");

    for block in members {
        submit.submit(SubmitRequest {
            block,
            op: BlockOp::Write,
        });
        set.mark_submitted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(nr_dirty: i64, nr_writeback: i64) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            nr_dirty,
            nr_writeback,
            nr_submitted: 0,
            dirty_seq: 0,
            writeback_seq: 0,
            sync_seq: 0,
        }
    }

    #[test]
    fn threshold_triggers_writeback() {
        let snap = snapshot(WRITEBACK_THRESH as i64, 0);
        assert!(should_writeback(&snap, 0, 5));
    }

    #[test]
    fn sync_pressure_triggers_writeback_below_threshold() {
        let snap = snapshot(1, 0);
        assert!(should_writeback(&snap, 10, 5));
        assert!(!should_writeback(&snap, 3, 5));
    }
}
