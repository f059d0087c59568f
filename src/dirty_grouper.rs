//! C8 — groups newly-dirtied blocks into sets and promotes them once
//! full or explicitly closed, grounded on `get_other_set` and the
//! SET_LIMIT enforcement in `original_source/shared/block.c`.
//!
//! A block's dirty-set membership is serialized by its own back-reference
//! (`BlockEntry::set`, a compare-and-swap lock), but deciding *which* set
//! two already-dirty blocks should end up sharing
//! needs a second, short-lived critical section: `merge_lock`, shared with
//! the writeback pipeline (C5), so a set can never be claimed for flushing
//! in the middle of a merge transplanting members into or out of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::block::{BL_DIRTY, BlockEntry};
use crate::config::{DIRTY_LIMIT, SET_LIMIT};
use crate::dirty_set::{DirtySet, SET_DIRTY, SET_DIRTYING, SET_WRITEBACK};
use crate::metrics::CacheMetrics;
use crate::sync::SyncFence;
use crate::writeback::WritebackPipeline;

pub struct DirtyGrouper {
    next_seq: AtomicU64,
    merge_lock: Arc<Mutex<()>>,
    writeback: Arc<WritebackPipeline>,
    sync: Arc<SyncFence>,
    metrics: CacheMetrics,
}

impl DirtyGrouper {
    pub fn new(
        writeback: Arc<WritebackPipeline>,
        sync: Arc<SyncFence>,
        metrics: CacheMetrics,
        merge_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            merge_lock,
            writeback,
            sync,
            metrics,
        }
    }

    fn fresh_dirtying_set() -> Arc<DirtySet> {
        let set = Arc::new(DirtySet::new());
        set.bits.set(SET_DIRTYING);
        set
    }

    /// Group every block in `blocks` into one dirty set, scoped entirely
    /// to this call's write-list. There is no cache-wide "currently open
    /// set" — if a block already belongs to some other set (from an
    /// overlapping, concurrently-committing transaction), that set's
    /// members are merged in by back-reference: the smaller set's members
    /// are transplanted into the larger, each transplanted block's
    /// back-reference is rewritten, and the smaller set is dissolved. A
    /// block whose existing set has already reached `SET_WRITEBACK` is
    /// left alone (it's already flushing); this call waits for that to
    /// clear and retries, rather than merging into a set mid-flush.
    ///
    /// Blocks while `nr_dirty >= DIRTY_LIMIT`, matching the original
    /// source's dirty-side backpressure.
    pub async fn dirty_begin(&self, blocks: Vec<Arc<BlockEntry>>) -> Arc<DirtySet> {
        if blocks.is_empty() {
            return Arc::new(DirtySet::new());
        }

        loop {
            let notified = self.metrics.dirty_limit_waiters.notified();
            if self.metrics.nr_dirty.load(Ordering::Relaxed) < DIRTY_LIMIT as i64 {
                break;
            }
            notified.await;
        }

        #[cfg(feature = "failpoints")]
        crate::failpoints::fail_point!(crate::failpoints::DIRTY_BEGIN_BEFORE_MERGE);

        let mut target = Self::fresh_dirtying_set();

        for block in &blocks {
            'attach: loop {
                let guard = self.merge_lock.lock().unwrap();

                if target.len() >= SET_LIMIT {
                    let full = std::mem::replace(&mut target, Self::fresh_dirtying_set());
                    self.promote_locked(full);
                }

                match block.set.load_full() {
                    None => {
                        block.bits.set(BL_DIRTY);
                        target.push_member(block.clone());
                        block.set.store(Some(target.clone()));
                        break 'attach;
                    }
                    Some(existing) if Arc::ptr_eq(&existing, &target) => break 'attach,
                    Some(existing) if existing.bits.test(SET_WRITEBACK) => {
                        // Already claimed by writeback; wait it out and
                        // retry rather than merging into a flushing set.
                        drop(guard);
                        let notified = existing.waiters.notified();
                        if existing.bits.test(SET_WRITEBACK) {
                            notified.await;
                        }
                        continue 'attach;
                    }
                    Some(existing) => {
                        // Merge the smaller set's members into the
                        // larger survivor, so accounting never shrinks
                        // a set's membership without updating it.
                        let (small, large) = if existing.len() <= target.len() {
                            (existing.clone(), target.clone())
                        } else {
                            (target.clone(), existing.clone())
                        };

                        if small.len() + large.len() > SET_LIMIT {
                            // Merging would overflow SET_LIMIT: force the
                            // larger set out to writeback now instead,
                            // and keep assembling with whichever set
                            // survives as `target`.
                            self.promote_locked(large.clone());
                            if Arc::ptr_eq(&large, &target) {
                                target = Self::fresh_dirtying_set();
                            }
                            continue 'attach;
                        }

                        let drained = small.take_members();
                        for member in &drained {
                            member.set.store(Some(large.clone()));
                        }
                        large.absorb_members(drained);
                        small.dissolve_after_merge();

                        if Arc::ptr_eq(&small, &target) {
                            target = large;
                        }
                        break 'attach;
                    }
                }
            }
        }

        target
    }

    /// Close out `set`, regardless of size, promoting it from DIRTYING to
    /// DIRTY and handing it to writeback (C5). A no-op if `set` was
    /// already promoted out from under the caller mid-assembly (a
    /// SET_LIMIT-forced split during `dirty_begin` already did this).
    /// Called at transaction commit (C7) and by the sync fence (C9) so a
    /// partially-filled set doesn't sit DIRTYING indefinitely.
    pub fn dirty_end(&self, set: Arc<DirtySet>) {
        if set.is_empty() {
            return;
        }
        let _guard = self.merge_lock.lock().unwrap();
        if !set.bits.test(SET_DIRTYING) {
            // Already promoted (forced out by a SET_LIMIT split, or a
            // caller-contract violation double-closing the same set).
            return;
        }
        self.promote_locked(set);
    }

    /// Assumes the caller already holds `merge_lock`.
    fn promote_locked(&self, set: Arc<DirtySet>) {
        if set.is_empty() {
            return;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        set.assign_seq(seq);
        set.bits.clear(SET_DIRTYING);
        set.bits.set(SET_DIRTY);

        self.metrics.nr_dirty.fetch_add(set.len() as i64, Ordering::Relaxed);
        self.metrics.dirty_seq.fetch_max(seq, Ordering::Relaxed);

        self.sync.register(seq);
        self.writeback.nominate(set);
    }
}
