#![cfg(feature = "failpoints")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ngnfs_blockcache::config::BlockCacheConfig;
use ngnfs_blockcache::core::{BlockCache, Intent};
use ngnfs_blockcache::error::{BlockCacheError, Result};
use ngnfs_blockcache::page::Page;
use ngnfs_blockcache::transport::{BlockOp, BlockTransport, Completion, CompletionSink};
use ngnfs_blockcache::block::BlockEntry;

struct FlakyTransport {
    fail_reads: AtomicBool,
}

#[async_trait]
impl BlockTransport for FlakyTransport {
    fn queue_depth(&self) -> usize {
        32
    }

    async fn submit(
        &self,
        op: BlockOp,
        block: Arc<BlockEntry>,
        _page: Page,
        completions: CompletionSink,
    ) -> Result<()> {
        let result = match op {
            BlockOp::GetRead if self.fail_reads.load(Ordering::Relaxed) => {
                Err(BlockCacheError::Io(-5))
            }
            BlockOp::GetRead => Ok(Some(Page::zeroed())),
            BlockOp::GetWrite | BlockOp::Write => Ok(None),
        };
        completions.complete(Completion { block, op, result });
        Ok(())
    }

    async fn shutdown(&self) {}
}

/// A read that fails at the transport latches BL_ERROR on the block and
/// surfaces the error to the caller. The errored entry is evicted from
/// the index as part of returning that error, so a later `get` for the
/// same bnr -- with the same `Read` intent, not a `New` that sidesteps
/// the error path entirely -- starts a fresh read instead of replaying
/// the stale failure.
#[tokio::test]
async fn failed_read_latches_block_error_and_retry_recovers() {
    let transport = Arc::new(FlakyTransport {
        fail_reads: AtomicBool::new(true),
    });
    let cache = BlockCache::setup(BlockCacheConfig::default(), transport.clone());

    let err = cache.get(9, Intent::Read).await.unwrap_err();
    assert_eq!(err, BlockCacheError::Io(-5));

    transport.fail_reads.store(false, Ordering::Relaxed);
    let block = cache.get(9, Intent::Read).await.unwrap();
    assert!(block.bits.test(ngnfs_blockcache::block::BL_UPTODATE));
    assert!(!block.bits.test(ngnfs_blockcache::block::BL_ERROR));

    cache.destroy().await;
}

/// The submit pipeline's injected pause point (`transport_submit_read`)
/// fires once per read without disrupting unrelated concurrent gets.
#[tokio::test]
async fn submit_read_failpoint_does_not_affect_concurrent_gets() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("transport_submit_read", "off").unwrap();

    let transport = Arc::new(FlakyTransport {
        fail_reads: AtomicBool::new(false),
    });
    let cache = BlockCache::setup(BlockCacheConfig::default(), transport);

    let (a, b) = tokio::join!(cache.get(1, Intent::Read), cache.get(2, Intent::Read));
    assert!(a.is_ok());
    assert!(b.is_ok());

    cache.destroy().await;
    scenario.teardown();
}
