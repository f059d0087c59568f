//! Top-level wiring: the public `BlockCache` handle that owns the
//! indexed cache, the dirty grouper, both pipelines, the completion
//! handler, and the sync fence, grounded on `ngnfs_block_cache_setup`/
//! `destroy` and `ngnfs_block_get`/`commit` in
//! `original_source/shared/block.c`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::block::{BL_ERROR, BL_READING, BL_UPTODATE, BlockEntry};
use crate::cache::IndexedCache;
use crate::completion;
use crate::config::BlockCacheConfig;
use crate::dirty_grouper::DirtyGrouper;
use crate::dirty_set::DirtySet;
use crate::error::{BlockCacheError, Result};
use crate::metrics::CacheMetrics;
use crate::page::Page;
use crate::submit::{SubmitPipeline, SubmitRequest};
use crate::sync::SyncFence;
use crate::task::spawn_named;
use crate::transport::{BlockOp, BlockTransport, CompletionSink};
use crate::writeback::WritebackPipeline;

/// What a caller wants to do with a block it's acquiring via [`BlockCache::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Read the current contents; triggers a fetch if not already cached.
    Read,
    /// Same as `Read`, but the caller intends to mutate afterward. Not
    /// currently distinguished from `Read` by any caller — kept for
    /// wire-compatibility with transports that expect the full op enum.
    Write,
    /// The caller is about to overwrite the block wholesale and doesn't
    /// need its previous contents; returns a freshly zeroed, immediately
    /// UPTODATE block with no I/O.
    New,
}

pub struct BlockCache {
    index: IndexedCache,
    grouper: DirtyGrouper,
    submit: Arc<SubmitPipeline>,
    writeback: Arc<WritebackPipeline>,
    sync: Arc<SyncFence>,
    metrics: CacheMetrics,
    transport: Arc<dyn BlockTransport>,
    completions: CompletionSink,
    cancel: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BlockCache {
    /// Spin up the cache and its three background workers (submit,
    /// writeback, completion) over the given transport.
    pub fn setup(config: BlockCacheConfig, transport: Arc<dyn BlockTransport>) -> Arc<Self> {
        let metrics = CacheMetrics::new();
        let sync = Arc::new(SyncFence::new(config.sync_error_policy));
        let merge_lock = Arc::new(std::sync::Mutex::new(()));
        let writeback = Arc::new(WritebackPipeline::new(merge_lock.clone()));
        let submit = Arc::new(SubmitPipeline::new());
        let grouper = DirtyGrouper::new(writeback.clone(), sync.clone(), metrics.clone(), merge_lock);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let completions = CompletionSink::new(completions_tx);
        let cancel = CancellationToken::new();

        let cache = Arc::new(Self {
            index: IndexedCache::new(),
            grouper,
            submit: submit.clone(),
            writeback: writeback.clone(),
            sync: sync.clone(),
            metrics: metrics.clone(),
            transport: transport.clone(),
            completions: completions.clone(),
            cancel: cancel.clone(),
            workers: std::sync::Mutex::new(Vec::new()),
        });

        let mut workers = Vec::new();

        workers.push(spawn_named("ngnfs-block-submit-pipeline", {
            let submit = submit.clone();
            let transport = transport.clone();
            let completions = completions.clone();
            let cancel = cancel.clone();
            async move {
                submit.run(transport, completions, cancel).await;
            }
        }));

        workers.push(spawn_named("ngnfs-block-writeback-pipeline", {
            let writeback = writeback.clone();
            let submit = submit.clone();
            let metrics = metrics.clone();
            let synced_seq = metrics.sync_seq.clone();
            let tick = config.writeback_tick;
            let cancel = cancel.clone();
            async move {
                writeback.run(submit, metrics, synced_seq, tick, cancel).await;
            }
        }));

        workers.push(spawn_named("ngnfs-block-completion-handler", {
            let metrics = metrics.clone();
            let sync = sync.clone();
            let cancel = cancel.clone();
            async move {
                completion::run(completions_rx, metrics, sync, cancel).await;
            }
        }));

        *cache.workers.lock().unwrap() = workers;
        cache
    }

    /// Cancel the background workers, tell the transport to drain, and
    /// join everything. Idempotent-ish: calling twice just joins empty
    /// handles the second time.
    pub async fn destroy(&self) {
        self.cancel.cancel();
        self.transport.shutdown().await;
        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.clone()
    }

    /// Acquire a block, fetching it from the transport if needed.
    pub async fn get(&self, bnr: u64, intent: Intent) -> Result<Arc<BlockEntry>> {
        let block = self.index.lookup_or_insert_with(bnr, || Arc::new(BlockEntry::new(bnr)));

        if intent == Intent::New {
            return self.get_new(block).await;
        }

        loop {
            // Registering interest before checking state (rather than
            // after) is what keeps this from missing a wakeup that lands
            // between the check and the `.await` below.
            let notified = block.waiters.notified();

            if block.bits.test(BL_ERROR) {
                // Don't let a poisoned entry keep answering every future
                // `get` with the same stale error: evict it (unless a
                // fresher entry has already raced in) so the next caller
                // gets a clean retry instead of the cached failure.
                self.index.remove_if_same(bnr, &block);
                return Err(BlockCacheError::Io(block.error()));
            }
            if block.bits.test(BL_UPTODATE) {
                return Ok(block);
            }

            if !block.bits.test_and_set(BL_READING) {
                self.submit.submit(SubmitRequest {
                    block: block.clone(),
                    op: BlockOp::GetRead,
                });
            }

            notified.await;
        }
    }

    /// `Intent::New`: the caller doesn't care about existing contents.
    /// If a read is already in flight (another caller got here first
    /// with `Read`), wait it out rather than racing a zero-fill against
    /// the fetch, then overwrite once it lands.
    async fn get_new(&self, block: Arc<BlockEntry>) -> Result<Arc<BlockEntry>> {
        loop {
            let notified = block.waiters.notified();
            if !block.bits.test(BL_READING) {
                break;
            }
            notified.await;
        }
        block.zero_buf();
        block.bits.set(BL_UPTODATE);
        block.bits.clear(BL_ERROR);
        Ok(block)
    }

    /// Group every block in `blocks` into one dirty set, merging with
    /// whatever set any of them already belong to. Scoped entirely to
    /// this call's list -- there is no cache-wide "currently open set".
    pub async fn dirty_begin(&self, blocks: Vec<Arc<BlockEntry>>) -> Arc<DirtySet> {
        self.grouper.dirty_begin(blocks).await
    }

    /// Close out `set`, regardless of size.
    pub fn dirty_end(&self, set: Arc<DirtySet>) {
        self.grouper.dirty_end(set);
    }

    /// Wait for everything dirtied so far (by sequence number) to finish
    /// writeback.
    pub async fn sync(&self) -> Result<()> {
        let seq = self.metrics.dirty_seq.load(std::sync::atomic::Ordering::Relaxed);
        self.metrics.sync_seq.fetch_max(seq, std::sync::atomic::Ordering::Relaxed);
        debug!(seq, "sync requested");
        self.sync.sync_up_to_seq(seq).await
    }

    pub fn buf(&self, block: &BlockEntry) -> Page {
        block.buf_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemTransport {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl BlockTransport for MemTransport {
        fn queue_depth(&self) -> usize {
            64
        }

        async fn submit(
            &self,
            op: BlockOp,
            block: Arc<BlockEntry>,
            _page: Page,
            completions: CompletionSink,
        ) -> Result<()> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            let result = match op {
                BlockOp::GetRead => Ok(Some(Page::zeroed())),
                BlockOp::GetWrite | BlockOp::Write => Ok(None),
            };
            completions.complete(crate::transport::Completion { block, op, result });
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn new_block_is_immediately_available() {
        let cache = BlockCache::setup(
            BlockCacheConfig::default(),
            Arc::new(MemTransport { reads: AtomicUsize::new(0) }),
        );
        let block = cache.get(0, Intent::New).await.unwrap();
        assert!(block.bits.test(BL_UPTODATE));
        cache.destroy().await;
    }

    #[tokio::test]
    async fn read_fetches_through_transport() {
        let cache = BlockCache::setup(
            BlockCacheConfig::default(),
            Arc::new(MemTransport { reads: AtomicUsize::new(0) }),
        );
        let block = cache.get(1, Intent::Read).await.unwrap();
        assert!(block.bits.test(BL_UPTODATE));
        cache.destroy().await;
    }

    #[tokio::test]
    async fn dirty_and_sync_round_trip() {
        let cache = BlockCache::setup(
            BlockCacheConfig::default(),
            Arc::new(MemTransport { reads: AtomicUsize::new(0) }),
        );
        let block = cache.get(2, Intent::New).await.unwrap();
        block.mutate_buf(|buf| buf[0] = 7);
        let set = cache.dirty_begin(vec![block.clone()]).await;
        cache.dirty_end(set);
        cache.sync().await.unwrap();
        cache.destroy().await;
    }

    struct FlakyOnceTransport {
        failed_once: AtomicUsize,
    }

    #[async_trait]
    impl BlockTransport for FlakyOnceTransport {
        fn queue_depth(&self) -> usize {
            64
        }

        async fn submit(
            &self,
            op: BlockOp,
            block: Arc<BlockEntry>,
            _page: Page,
            completions: CompletionSink,
        ) -> Result<()> {
            let result = match op {
                BlockOp::GetRead if self.failed_once.fetch_add(1, Ordering::Relaxed) == 0 => {
                    Err(BlockCacheError::Io(-5))
                }
                BlockOp::GetRead => Ok(Some(Page::zeroed())),
                BlockOp::GetWrite | BlockOp::Write => Ok(None),
            };
            completions.complete(crate::transport::Completion { block, op, result });
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    /// Regression test for a poisoned cache entry: the first `Read`
    /// fails and latches `BL_ERROR`, but the entry must be evicted so a
    /// second `Read` (not a fresh `New`) gets a real retry instead of the
    /// same cached error forever.
    #[tokio::test]
    async fn read_error_is_evicted_so_a_later_read_retries() {
        let cache = BlockCache::setup(
            BlockCacheConfig::default(),
            Arc::new(FlakyOnceTransport { failed_once: AtomicUsize::new(0) }),
        );

        let first = cache.get(3, Intent::Read).await;
        assert!(matches!(first, Err(BlockCacheError::Io(-5))));

        let second = cache.get(3, Intent::Read).await.unwrap();
        assert!(second.bits.test(BL_UPTODATE));
        assert!(!second.bits.test(BL_ERROR));

        cache.destroy().await;
    }
}
