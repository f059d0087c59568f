//! Shared multi-producer single-consumer intake used by the submit (C4)
//! and writeback (C5) pipelines.
//!
//! The original source pushes onto a lock-free LIFO `llist` and has its
//! single consumer pop-all-then-reverse to recover arrival order
//! (`original_source/shared/lk/llist.h`). Any multi-producer
//! single-consumer structure with equivalent ordering guarantees is a
//! legitimate substitute, so this wraps a `SegQueue` — already FIFO, no
//! reversal needed.

use crossbeam_queue::SegQueue;
use tokio::sync::Notify;

pub struct Intake<T> {
    queue: SegQueue<T>,
    kick: Notify,
}

impl<T> Intake<T> {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            kick: Notify::new(),
        }
    }

    /// Push an item and wake the consumer. Safe to call from any number
    /// of producer tasks concurrently.
    pub fn push(&self, item: T) {
        self.queue.push(item);
        self.kick.notify_one();
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Drain everything currently queued, in arrival order.
    pub fn drain_all(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.queue.pop() {
            items.push(item);
        }
        items
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Wait until `push` is called at least once after this call started.
    pub async fn wait_for_kick(&self) {
        self.kick.notified().await
    }
}

impl<T> Default for Intake<T> {
    fn default() -> Self {
        Self::new()
    }
}
