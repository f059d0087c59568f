//! C3 — the indexed cache mapping block number to `BlockEntry`, grounded
//! on the original source's RCU-protected `rhashtable` in
//! `original_source/shared/block.c`.
//!
//! The original relies on RCU read-side critical sections plus a grace
//! period before freeing a removed entry, so that a concurrent reader
//! that already has a pointer never sees freed memory. Safe Rust gets
//! the same guarantee for free from `Arc` refcounting: a lookup clones
//! an `Arc` out of the map under a (short) per-shard lock, and the entry
//! stays alive for as long as that clone does, regardless of whether the
//! map entry itself is removed in the meantime.

use std::sync::Arc;

use dashmap::DashMap;

use crate::block::BlockEntry;

#[derive(Default)]
pub struct IndexedCache {
    entries: DashMap<u64, Arc<BlockEntry>>,
}

impl IndexedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, bnr: u64) -> Option<Arc<BlockEntry>> {
        self.entries.get(&bnr).map(|e| e.clone())
    }

    /// Return the existing entry for `bnr`, or insert and return a freshly
    /// created one. The closure only runs when there's no existing entry,
    /// avoiding a wasted allocation on the common hit path.
    pub fn lookup_or_insert_with(
        &self,
        bnr: u64,
        new: impl FnOnce() -> Arc<BlockEntry>,
    ) -> Arc<BlockEntry> {
        self.entries.entry(bnr).or_insert_with(new).clone()
    }

    pub fn remove(&self, bnr: u64) -> Option<Arc<BlockEntry>> {
        self.entries.remove(&bnr).map(|(_, v)| v)
    }

    /// Remove `bnr`'s entry only if it's still the exact entry `expected`
    /// refers to. Guards against evicting a fresh entry that raced in
    /// after the caller decided (based on a now-stale observation) that
    /// the old one needed to go.
    pub fn remove_if_same(&self, bnr: u64, expected: &Arc<BlockEntry>) {
        self.entries.remove_if(&bnr, |_, v| Arc::ptr_eq(v, expected));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot every currently-cached entry. Used by shutdown paths that
    /// need to wait out or report on in-flight blocks.
    pub fn drain(&self) -> Vec<Arc<BlockEntry>> {
        let entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        self.entries.clear();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_or_insert_is_idempotent() {
        let cache = IndexedCache::new();
        let a = cache.lookup_or_insert_with(1, || Arc::new(BlockEntry::new(1)));
        let b = cache.lookup_or_insert_with(1, || Arc::new(BlockEntry::new(1)));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removed_entry_survives_via_outstanding_arc() {
        let cache = IndexedCache::new();
        let held = cache.lookup_or_insert_with(5, || Arc::new(BlockEntry::new(5)));
        cache.remove(5);
        assert!(cache.lookup(5).is_none());
        assert_eq!(held.bnr, 5);
    }

    #[test]
    fn remove_if_same_spares_a_fresh_entry_that_raced_in() {
        let cache = IndexedCache::new();
        let stale = cache.lookup_or_insert_with(9, || Arc::new(BlockEntry::new(9)));
        cache.remove(9);
        let fresh = cache.lookup_or_insert_with(9, || Arc::new(BlockEntry::new(9)));
        cache.remove_if_same(9, &stale);
        assert!(Arc::ptr_eq(&cache.lookup(9).unwrap(), &fresh));
    }
}
