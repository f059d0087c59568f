//! A tiny atomic bitset standing in for the original source's
//! `test_and_set_bit`/`test_and_clear_bit`/`clear_bit` over `unsigned long
//! bits` (`shared/lk/bitops.h`).
//!
//! The DIRTYING/WRITEBACK handshake and READING/UPTODATE/ERROR
//! visibility both need full fences, so every operation here uses
//! `Ordering::SeqCst` rather than trying to thread weaker orderings
//! through by hand.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Default)]
pub struct AtomicBits(AtomicU8);

impl AtomicBits {
    pub fn new(initial: u8) -> Self {
        Self(AtomicU8::new(initial))
    }

    #[inline]
    pub fn test(&self, bit: u8) -> bool {
        self.0.load(Ordering::SeqCst) & (1 << bit) != 0
    }

    /// Sets the bit, returning whether it was already set.
    #[inline]
    pub fn test_and_set(&self, bit: u8) -> bool {
        let old = self.0.fetch_or(1 << bit, Ordering::SeqCst);
        old & (1 << bit) != 0
    }

    #[inline]
    pub fn set(&self, bit: u8) {
        self.0.fetch_or(1 << bit, Ordering::SeqCst);
    }

    /// Clears the bit, returning whether it had been set.
    #[inline]
    pub fn clear(&self, bit: u8) -> bool {
        let old = self.0.fetch_and(!(1 << bit), Ordering::SeqCst);
        old & (1 << bit) != 0
    }
}
