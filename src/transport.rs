//! The block transport boundary.
//!
//! The transport is an external collaborator: the socket message bus, the
//! AIO device-file transport, or (in tests) an in-memory stand-in. This
//! crate only depends on the trait below, matching `struct
//! ngnfs_block_transport_ops` in `shared/block.h` of the original source.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::block::BlockEntry;
use crate::error::BlockCacheError;
use crate::page::Page;

/// The operation a submitted block I/O represents.
///
/// `GetWrite` is named in the original source's enum
/// (`NGNFS_BTX_OP_GET_WRITE`) but, as the original comments note, isn't
/// wired up by any caller yet — `get(WRITE)` never waits on a read. It's
/// kept here for wire-compatibility with transports that expect the full
/// three-op enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOp {
    GetRead,
    GetWrite,
    Write,
}

/// One completed block I/O, handed back to the cache's completion
/// handler (C6) out of band from the submission that started it.
///
/// `page` carries the data fetched by a read; writes echo back `None`
/// since the cache's own buffer is already current.
pub struct Completion {
    pub block: Arc<BlockEntry>,
    pub op: BlockOp,
    pub result: Result<Option<Page>, BlockCacheError>,
}

/// The cache's handle for transports to report completions through.
/// Cheap to clone; transports are expected to stash one per in-flight
/// submission (or just one, shared) and push a [`Completion`] whenever
/// the underlying medium finishes, from whatever task or callback that
/// happens on.
#[derive(Clone)]
pub struct CompletionSink(mpsc::UnboundedSender<Completion>);

impl CompletionSink {
    pub fn new(tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self(tx)
    }

    /// Report a completion. Silently dropped if the cache has already
    /// shut down its completion handler — matches the original source's
    /// tolerance of completions racing shutdown.
    pub fn complete(&self, completion: Completion) {
        let _ = self.0.send(completion);
    }
}

/// Asynchronous, queue-depth-bounded block I/O.
///
/// `submit` must return promptly, once the request has been handed off
/// to the underlying medium — it does not wait for the I/O itself.
/// Completion is reported later, exactly once per submission, through
/// the [`CompletionSink`] passed alongside the request.
#[async_trait]
pub trait BlockTransport: Send + Sync + 'static {
    /// Maximum number of submissions this transport will accept before a
    /// completion must be delivered to free up room. Read once at setup;
    /// the core does not re-query it.
    fn queue_depth(&self) -> usize;

    /// Submit one block operation. Must not block past the point that the
    /// request is handed off to the underlying medium. `block` is handed
    /// back unchanged in the eventual [`Completion`] so the handler never
    /// has to re-look it up by number.
    async fn submit(
        &self,
        op: BlockOp,
        block: Arc<BlockEntry>,
        page: Page,
        completions: CompletionSink,
    ) -> Result<(), BlockCacheError>;

    /// Stop accepting submissions and drain completions for everything
    /// already in flight. Called once, before `destroy`.
    async fn shutdown(&self);
}
