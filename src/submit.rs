//! C4 — submit pipeline: drains queued I/O requests and hands them to
//! the transport, grounded on `ngnfs_block_submit_bio`/`submit_read`/
//! `submit_write` in `original_source/shared/block.c`.
//!
//! The original enqueues onto a lock-free list and has a dedicated
//! kernel thread pop entries and issue `submit_bio`. This mirrors that:
//! drain intake in arrival order, hand each to the transport, and move
//! on without waiting for the I/O itself — completion arrives later,
//! out of band, through the [`crate::transport::CompletionSink`] and is
//! handled by C6.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::block::BlockEntry;
use crate::intake::Intake;
use crate::transport::{BlockOp, BlockTransport, CompletionSink};

pub struct SubmitRequest {
    pub block: Arc<BlockEntry>,
    pub op: BlockOp,
}

pub struct SubmitPipeline {
    intake: Intake<SubmitRequest>,
}

impl SubmitPipeline {
    pub fn new() -> Self {
        Self {
            intake: Intake::new(),
        }
    }

    pub fn submit(&self, req: SubmitRequest) {
        self.intake.push(req);
    }

    pub async fn run(
        &self,
        transport: Arc<dyn BlockTransport>,
        completions: CompletionSink,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("submit pipeline shutting down");
                    return;
                }
                _ = self.intake.wait_for_kick() => {}
            }

            for req in self.intake.drain_all() {
                let SubmitRequest { block, op } = req;

                #[cfg(feature = "failpoints")]
                match op {
                    BlockOp::GetRead => crate::failpoints::fail_point!(crate::failpoints::TRANSPORT_SUBMIT_READ),
                    BlockOp::GetWrite | BlockOp::Write => {
                        crate::failpoints::fail_point!(crate::failpoints::TRANSPORT_SUBMIT_WRITE)
                    }
                }

                let page = block.buf_snapshot();
                let bnr = block.bnr;
                let block_for_err = block.clone();
                if let Err(err) = transport
                    .submit(op, block, page, completions.clone())
                    .await
                {
                    warn!(bnr, ?err, "transport rejected submission");
                    completions.complete(crate::transport::Completion {
                        block: block_for_err,
                        op,
                        result: Err(err),
                    });
                }
            }
        }
    }
}

impl Default for SubmitPipeline {
    fn default() -> Self {
        Self::new()
    }
}
