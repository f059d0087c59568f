//! C1 — the cache line for one block.

use std::sync::Mutex;

use arc_swap::ArcSwapOption;
use bytes::BytesMut;
use tokio::sync::Notify;

use crate::dirty_set::DirtySet;
use crate::page::Page;

pub const BL_READING: u8 = 0;
pub const BL_UPTODATE: u8 = 1;
pub const BL_ERROR: u8 = 2;
pub const BL_DIRTY: u8 = 3;

use crate::bits::AtomicBits;

/// One cached block.
///
/// Refcounted via `Arc`; the indexed cache (C3) holds one `Arc`, every
/// in-flight acquisition or I/O submission holds another. There is no
/// explicit destructor to run — the buffer and the `ArcSwapOption` set
/// back-reference drop along with the last `Arc` — ordinary Rust
/// refcounting, standing in for the RCU grace period the original source
/// uses to defer freeing a removed entry.
pub struct BlockEntry {
    pub bnr: u64,
    buf: Mutex<Page>,
    pub bits: AtomicBits,
    /// Transport error code, valid once `BL_ERROR` is observed set.
    error: std::sync::atomic::AtomicI32,
    /// Doubles as the membership-serialization point for the owning dirty
    /// set. Installing via a compare-and-swap acts as the "lock";
    /// clearing it is the "unlock".
    pub set: ArcSwapOption<DirtySet>,
    pub waiters: Notify,
}

impl BlockEntry {
    pub fn new(bnr: u64) -> Self {
        Self {
            bnr,
            buf: Mutex::new(Page::zeroed()),
            bits: AtomicBits::default(),
            error: std::sync::atomic::AtomicI32::new(0),
            set: ArcSwapOption::from(None),
            waiters: Notify::new(),
        }
    }

    pub fn buf_snapshot(&self) -> Page {
        self.buf.lock().unwrap().clone()
    }

    pub fn install_page(&self, page: Page) {
        *self.buf.lock().unwrap() = page;
    }

    pub fn zero_buf(&self) {
        *self.buf.lock().unwrap() = Page::zeroed();
    }

    /// Mutate the buffer's contents in place. Callers must hold a WRITE
    /// reference and the owning set's dirtying lease; this method
    /// doesn't itself enforce that, matching the original source treating
    /// it as a caller-contract invariant rather than a runtime check.
    pub fn mutate_buf(&self, f: impl FnOnce(&mut [u8])) {
        let mut guard = self.buf.lock().unwrap();
        let mut bytes = BytesMut::from(guard.as_slice());
        f(&mut bytes);
        *guard = Page::from_bytes(bytes.freeze());
    }

    pub fn error(&self) -> i32 {
        self.error.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set_error(&self, err: i32) {
        self.error.store(err, std::sync::atomic::Ordering::SeqCst);
        self.bits.set(BL_ERROR);
    }

    /// Clear READING, waking anyone parked on it. No-op if it wasn't set.
    pub fn clear_reading_and_wake(&self) {
        if self.bits.clear(BL_READING) {
            self.waiters.notify_waiters();
        }
    }
}

impl std::fmt::Debug for BlockEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockEntry").field("bnr", &self.bnr).finish()
    }
}
