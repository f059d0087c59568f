//! C2 — a group of blocks dirtied and written back together, grounded
//! on `struct ngnfs_block_set` and
//! `enum { SET_DIRTYING, SET_DIRTY, SET_WRITEBACK }` in
//! `original_source/shared/block.c`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::bits::AtomicBits;
use crate::block::BlockEntry;
use std::sync::Arc;

pub const SET_DIRTYING: u8 = 0;
pub const SET_DIRTY: u8 = 1;
pub const SET_WRITEBACK: u8 = 2;

/// A dirty set starts life DIRTYING while the grouper (C8) is still
/// assembling members, flips to DIRTY once merging stops, then to
/// WRITEBACK once the writeback pipeline (C5) claims it. It dissolves
/// (drops its last `Arc`) once every member block's completion has fired.
pub struct DirtySet {
    pub bits: AtomicBits,
    members: Mutex<Vec<Arc<BlockEntry>>>,
    /// Assigned once, on the DIRTYING -> DIRTY transition. Zero means
    /// "not yet assigned" and is never itself a valid sequence number
    /// (the grouper hands out sequence numbers starting at 1).
    seq: AtomicU64,
    /// Members submitted to the transport so far; compared against
    /// `members.len()` to know when the last one has gone out.
    submitted: AtomicUsize,
    /// Members whose completion has not yet fired; reaching zero is what
    /// lets the set dissolve.
    outstanding: AtomicUsize,
    /// First member error observed, if any; reported to the sync fence
    /// once the set fully dissolves.
    error: AtomicI32,
    pub waiters: Notify,
}

impl DirtySet {
    pub fn new() -> Self {
        Self {
            bits: AtomicBits::default(),
            members: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            submitted: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            error: AtomicI32::new(0),
            waiters: Notify::new(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Assign a sequence number. Only valid once, on promotion out of
    /// DIRTYING; callers enforce the once-ness via the DIRTYING bit.
    pub fn assign_seq(&self, seq: u64) {
        self.seq.store(seq, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a block to this set. Caller must hold the set's DIRTYING
    /// lease — merging into a DIRTY or WRITEBACK set is a bug.
    pub fn push_member(&self, block: Arc<BlockEntry>) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.members.lock().unwrap().push(block);
    }

    pub fn members_snapshot(&self) -> Vec<Arc<BlockEntry>> {
        self.members.lock().unwrap().clone()
    }

    /// Drain every member out of this set, zeroing `outstanding` with it.
    /// Used when merging this (the smaller) set's members into another;
    /// the caller is responsible for rewriting each block's back-reference
    /// and handing the drained list to the survivor's
    /// [`DirtySet::absorb_members`].
    pub fn take_members(&self) -> Vec<Arc<BlockEntry>> {
        self.outstanding.store(0, Ordering::SeqCst);
        std::mem::take(&mut *self.members.lock().unwrap())
    }

    /// Splice a drained member list (from [`DirtySet::take_members`] on
    /// some other, smaller set) into this one.
    pub fn absorb_members(&self, mut incoming: Vec<Arc<BlockEntry>>) {
        self.outstanding.fetch_add(incoming.len(), Ordering::SeqCst);
        self.members.lock().unwrap().append(&mut incoming);
    }

    /// Release a set that lost a merge: it has no members left, so it can
    /// never dissolve through the normal completion path. Clear its
    /// lifecycle bits directly and wake anyone parked on it.
    pub fn dissolve_after_merge(&self) {
        self.bits.clear(SET_DIRTY);
        self.bits.clear(SET_DIRTYING);
        self.waiters.notify_waiters();
    }

    pub fn mark_submitted(&self) -> usize {
        self.submitted.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn all_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst) >= self.len()
    }

    /// Record one member's completion, returning `true` if this was the
    /// last outstanding member (the set is now dissolvable).
    pub fn complete_one(&self) -> bool {
        self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn note_error(&self, code: i32) {
        self.error.compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst).ok();
    }

    pub fn error(&self) -> i32 {
        self.error.load(Ordering::SeqCst)
    }
}

impl Default for DirtySet {
    fn default() -> Self {
        Self::new()
    }
}
