//! C6 — completion handler, grounded on `end_read_io`/`end_write_io` in
//! `original_source/shared/block.c`.
//!
//! Runs as a dedicated worker draining the transport's completion
//! channel, rather than being invoked synchronously from within the
//! transport's own call stack (the original runs it from bio interrupt
//! context). The effect is the same: each completion is handled exactly
//! once, promptly, and independently of whatever the submit pipeline is
//! doing concurrently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::block::{BL_DIRTY, BL_UPTODATE, BlockEntry};
use crate::dirty_set::SET_WRITEBACK;
use crate::metrics::CacheMetrics;
use crate::sync::SyncFence;
use crate::transport::{BlockOp, Completion};

pub async fn run(
    mut completions: mpsc::UnboundedReceiver<Completion>,
    metrics: CacheMetrics,
    sync: Arc<SyncFence>,
    cancel: CancellationToken,
) {
    loop {
        let completion = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("completion handler shutting down");
                return;
            }
            completion = completions.recv() => match completion {
                Some(c) => c,
                None => return,
            },
        };

        match completion.op {
            BlockOp::GetRead => end_read_io(&completion.block, completion.result),
            BlockOp::GetWrite | BlockOp::Write => {
                let set = completion.block.set.load_full();
                match set {
                    Some(set) => end_write_io(&completion.block, &set, completion.result, &metrics, &sync),
                    None => error!(
                        bnr = completion.block.bnr,
                        "write completion for block with no owning set"
                    ),
                }
            }
        }
    }
}

/// A read finished. Installs the fetched page (if any), marks UPTODATE
/// or ERROR, clears READING, and wakes anyone parked on the block.
pub fn end_read_io(
    block: &BlockEntry,
    result: Result<Option<crate::page::Page>, crate::error::BlockCacheError>,
) {
    match result {
        Ok(page) => {
            if let Some(page) = page {
                block.install_page(page);
            }
            block.bits.set(BL_UPTODATE);
            trace!(bnr = block.bnr, "read completed");
        }
        Err(err) => {
            block.set_error(err.io_code());
            error!(bnr = block.bnr, ?err, "read failed");
        }
    }

    block.clear_reading_and_wake();
}

/// A write finished. Marks the block's error state if it failed, then
/// tells the owning set one fewer member is outstanding. Once every
/// member has completed, the set transitions out of WRITEBACK and its
/// last `Arc` drops, dissolving it; metrics reflect the drop immediately
/// so sync fences waiting on this set's sequence number can proceed.
pub fn end_write_io(
    block: &BlockEntry,
    set: &crate::dirty_set::DirtySet,
    result: Result<Option<crate::page::Page>, crate::error::BlockCacheError>,
    metrics: &CacheMetrics,
    sync: &SyncFence,
) {
    debug_assert!(set.bits.test(SET_WRITEBACK), "write completion for non-writeback set");

    // A failed write leaves the block DIRTY so a future writeback pass
    // retries it: a hard invariant violation in debug builds, an inert
    // error-latched no-op (block stays dirty, set still dissolves) in
    // release.
    if let Err(err) = result {
        debug_assert!(false, "block {} write failed: {err:?}", block.bnr);
        block.set_error(err.io_code());
        set.note_error(err.io_code());
    } else {
        block.bits.clear(BL_DIRTY);
        block.set.store(None);
    }

    metrics.nr_writeback.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

    #[cfg(feature = "failpoints")]
    crate::failpoints::fail_point!(crate::failpoints::COMPLETION_BEFORE_DISSOLVE);

    if set.complete_one() {
        metrics.nr_dirty.fetch_sub(set.len() as i64, std::sync::atomic::Ordering::Relaxed);
        metrics.dirty_limit_waiters.notify_waiters();

        let seq = set.seq();
        let result = if set.error() != 0 {
            Err(crate::error::BlockCacheError::Io(set.error()))
        } else {
            Ok(())
        };
        sync.complete(seq, result);

        set.waiters.notify_waiters();
    }
}
