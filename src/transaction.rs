//! C7 — transaction driver: batches several block acquisitions and
//! writes under one dirty-set boundary, grounded on the commit-time
//! `dirty_end` call in `original_source/shared/block.c` that closes out
//! whatever the current transaction dirtied.

use std::sync::Arc;

use crate::block::BlockEntry;
use crate::core::{BlockCache, Intent};
use crate::error::Result;

/// One atomic-with-respect-to-grouping unit of work: every block touched
/// through [`Transaction::get_mut`] lands in the same dirty set (or sets,
/// if SET_LIMIT forces a split) and that grouping is closed out exactly
/// once, on [`Transaction::commit`].
pub struct Transaction<'a> {
    cache: &'a BlockCache,
    touched: Vec<Arc<BlockEntry>>,
}

impl<'a> Transaction<'a> {
    pub fn new(cache: &'a BlockCache) -> Self {
        Self {
            cache,
            touched: Vec::new(),
        }
    }

    /// Acquire a block for reading within this transaction. Doesn't mark
    /// it dirty by itself — call [`Transaction::get_mut`] for that.
    pub async fn get(&self, bnr: u64, intent: Intent) -> Result<Arc<BlockEntry>> {
        self.cache.get(bnr, intent).await
    }

    /// Acquire a block and mark it as touched by this transaction. The
    /// caller is expected to mutate it via `BlockEntry::mutate_buf`
    /// before calling `commit`.
    pub async fn get_mut(&mut self, bnr: u64, intent: Intent) -> Result<Arc<BlockEntry>> {
        let block = self.cache.get(bnr, intent).await?;
        self.touched.push(block.clone());
        Ok(block)
    }

    /// Dirty every touched block as one group and close out the grouping
    /// boundary. Doesn't wait for writeback to finish — call
    /// `BlockCache::sync` for that.
    pub async fn commit(self) {
        if self.touched.is_empty() {
            return;
        }
        let set = self.cache.dirty_begin(self.touched.clone()).await;
        self.cache.dirty_end(set);
    }

    /// Abandon the transaction, dirtying nothing. Any block already
    /// acquired stays cached and UPTODATE; only the dirty-set membership
    /// is skipped.
    pub fn rollback(self) {}
}
