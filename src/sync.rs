//! C9 — sync fence: lets a caller wait for every dirty set up to some
//! sequence number to finish writeback, grounded on `sync_waiters` and
//! its low-bit-as-error-latch scheme in
//! `original_source/shared/block.c`.
//!
//! The original packs a waiter count and an error flag into one word so
//! a single CAS can both register a waiter and observe whether an error
//! has already been latched. Safe Rust doesn't need that packing trick:
//! a `DashMap` of outstanding sequence numbers plus a separate atomic
//! error code give the same observable behavior (wait for all pending
//! seqs <= target to clear, then report whether any of them errored)
//! without hand-rolled bit packing. The waiter count itself is still
//! tracked explicitly (a plain `AtomicUsize`) so the error latch can be
//! reset the moment the last waiter observing it departs, rather than
//! staying raised for every sync call that comes after.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::config::SyncErrorPolicy;
use crate::error::BlockCacheError;

pub struct SyncFence {
    pending: DashMap<u64, ()>,
    notify: Notify,
    /// Latched once any completion errors under `SyncErrorPolicy::Broadcast`.
    /// Cleared back to zero when `waiters` drops to zero, so a caller that
    /// shows up after every previously-waiting caller has observed and
    /// departed with the error doesn't see a stale latch from a fault that
    /// already finished being reported.
    error: AtomicI32,
    /// Number of callers currently parked in `sync_up_to_seq`.
    waiters: AtomicUsize,
    policy: SyncErrorPolicy,
}

impl SyncFence {
    pub fn new(policy: SyncErrorPolicy) -> Self {
        Self {
            pending: DashMap::new(),
            notify: Notify::new(),
            error: AtomicI32::new(0),
            waiters: AtomicUsize::new(0),
            policy,
        }
    }

    /// Register a set's sequence number as outstanding. Called right
    /// after a set is assigned its seq and handed to writeback.
    pub fn register(&self, seq: u64) {
        self.pending.insert(seq, ());
    }

    /// Record that `seq` finished, with `result` carrying whether the
    /// writeback that completed it succeeded.
    pub fn complete(&self, seq: u64, result: Result<(), BlockCacheError>) {
        self.pending.remove(&seq);
        if let Err(err) = result {
            if matches!(self.policy, SyncErrorPolicy::Broadcast) {
                self.error.store(err.io_code(), Ordering::SeqCst);
            }
        }
        self.notify.notify_waiters();
    }

    fn any_pending_up_to(&self, seq: u64) -> bool {
        self.pending.iter().any(|entry| *entry.key() <= seq)
    }

    /// Wait until every set with seq <= `seq` has completed, then report
    /// the latched error (if any and if the policy broadcasts it).
    ///
    /// Registers as a waiter for the duration of the call; if this is the
    /// last waiter to depart, the error latch is reset to zero so the
    /// fault doesn't keep surfacing to sync calls that start after every
    /// caller who needed to see it already has.
    pub async fn sync_up_to_seq(&self, seq: u64) -> Result<(), BlockCacheError> {
        self.waiters.fetch_add(1, Ordering::SeqCst);

        loop {
            let notified = self.notify.notified();
            if !self.any_pending_up_to(seq) {
                break;
            }
            notified.await;
        }

        let err = self.error.load(Ordering::SeqCst);
        if self.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.error.store(0, Ordering::SeqCst);
        }

        if err != 0 {
            Err(BlockCacheError::Io(err))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_resolves_immediately_with_nothing_pending() {
        let fence = SyncFence::new(SyncErrorPolicy::Broadcast);
        assert!(fence.sync_up_to_seq(0).await.is_ok());
    }

    #[tokio::test]
    async fn sync_waits_for_registered_seq_then_resolves() {
        let fence = std::sync::Arc::new(SyncFence::new(SyncErrorPolicy::Broadcast));
        fence.register(3);

        let waiter = {
            let fence = fence.clone();
            tokio::spawn(async move { fence.sync_up_to_seq(3).await })
        };

        tokio::task::yield_now().await;
        fence.complete(3, Ok(()));
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn broadcast_policy_surfaces_latched_error() {
        let fence = SyncFence::new(SyncErrorPolicy::Broadcast);
        fence.register(1);
        fence.complete(1, Err(BlockCacheError::Io(-5)));
        assert_eq!(fence.sync_up_to_seq(1).await, Err(BlockCacheError::Io(-5)));
    }

    #[tokio::test]
    async fn none_policy_swallows_error() {
        let fence = SyncFence::new(SyncErrorPolicy::None);
        fence.register(1);
        fence.complete(1, Err(BlockCacheError::Io(-5)));
        assert!(fence.sync_up_to_seq(1).await.is_ok());
    }

    #[tokio::test]
    async fn latch_clears_once_every_waiter_has_departed() {
        let fence = std::sync::Arc::new(SyncFence::new(SyncErrorPolicy::Broadcast));
        fence.register(1);
        fence.complete(1, Err(BlockCacheError::Io(-5)));

        let first = {
            let fence = fence.clone();
            tokio::spawn(async move { fence.sync_up_to_seq(1).await })
        };
        let second = {
            let fence = fence.clone();
            tokio::spawn(async move { fence.sync_up_to_seq(1).await })
        };
        assert_eq!(first.await.unwrap(), Err(BlockCacheError::Io(-5)));
        assert_eq!(second.await.unwrap(), Err(BlockCacheError::Io(-5)));

        // Both callers have now departed; a later sync past a clean seq
        // must not see the stale error.
        fence.register(2);
        fence.complete(2, Ok(()));
        assert!(fence.sync_up_to_seq(2).await.is_ok());
    }
}
