//! The fixed-size data buffer backing one cached block.

use bytes::{Bytes, BytesMut};

use crate::config::BLOCK_SIZE;

/// A `BLOCK_SIZE`-byte buffer.
///
/// Cloning a `Page` is cheap (`Bytes` is refcounted); the completion
/// handler swaps a block's page wholesale on read completion rather than
/// copying into an existing buffer, matching `end_read_io`'s page-pointer
/// swap in the original source.
#[derive(Clone)]
pub struct Page(Bytes);

impl Page {
    /// A freshly zeroed page, as used for `NBF_NEW` acquisitions.
    pub fn zeroed() -> Self {
        Self(BytesMut::zeroed(BLOCK_SIZE).freeze())
    }

    /// Wrap transport-provided bytes as a page.
    ///
    /// Panics if `data` is not exactly `BLOCK_SIZE` bytes; the transport
    /// contract guarantees fixed-size blocks.
    pub fn from_bytes(data: Bytes) -> Self {
        assert_eq!(data.len(), BLOCK_SIZE, "transport delivered a short page");
        Self(data)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("len", &self.0.len()).finish()
    }
}
