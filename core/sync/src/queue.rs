//! Ordered transfer work list.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

use drivesync_common::Result;

use crate::progress::{ProgressHub, ProgressReporter};

/// Work item with a payload size known ahead of time, if at all.
pub trait Payload {
    /// Payload size in bytes, `None` when unknown until transferred.
    fn size(&self) -> Option<u64>;
}

/// Result of moving one item.
#[derive(Debug)]
pub struct Transferred<O> {
    /// What the transport produced for the item.
    pub output: O,
    /// Bytes actually moved.
    pub bytes: u64,
}

/// Moves one item between the local filesystem and the remote store.
#[async_trait]
pub trait Transport<T: Send + 'static>: Send + Sync {
    /// Result identifier produced for each completed item.
    type Output: Send;

    /// Transfer `item`, reporting the item's own byte count as it moves.
    async fn transfer(&self, item: T, progress: &ProgressReporter)
        -> Result<Transferred<Self::Output>>;
}

/// FIFO queue of transfer items with a remaining-byte counter.
#[derive(Debug)]
pub struct TransferQueue<T> {
    items: VecDeque<T>,
    remaining: u64,
    transferred: u64,
}

impl<T> Default for TransferQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            remaining: 0,
            transferred: 0,
        }
    }
}

impl<T: Payload + Send + 'static> TransferQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Items of unknown size add nothing to the remaining count.
    pub fn enqueue(&mut self, item: T) {
        self.remaining += item.size().unwrap_or(0);
        self.items.push_back(item);
    }

    /// Number of items not yet dequeued.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bytes still expected to move.
    pub fn remaining_bytes(&self) -> u64 {
        self.remaining
    }

    /// Bytes moved so far by completed items.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred
    }

    /// Start dequeuing items through `transport`.
    ///
    /// The returned [`Drain`] yields one result per item, in order. After
    /// the first failure it yields nothing more and the items it did not
    /// reach stay in the queue.
    pub fn drain<'q, X>(&'q mut self, transport: &'q X, hub: &Arc<ProgressHub>) -> Drain<'q, T, X>
    where
        X: Transport<T> + ?Sized,
    {
        Drain {
            queue: self,
            transport,
            hub: hub.clone(),
            failed: false,
        }
    }
}

/// Single-pass sequence of transfer results.
pub struct Drain<'q, T, X: ?Sized> {
    queue: &'q mut TransferQueue<T>,
    transport: &'q X,
    hub: Arc<ProgressHub>,
    failed: bool,
}

impl<T, X> Drain<'_, T, X>
where
    T: Payload + Send + 'static,
    X: Transport<T> + ?Sized,
{
    /// Transfer the next item.
    ///
    /// Returns `None` once the queue is empty or a transfer has failed.
    pub async fn next(&mut self) -> Option<Result<X::Output>> {
        if self.failed {
            return None;
        }
        let item = self.queue.items.pop_front()?;

        let reporter = ProgressReporter::new(self.hub.clone(), self.queue.transferred);
        match self.transport.transfer(item, &reporter).await {
            Ok(done) => {
                self.queue.remaining = self.queue.remaining.saturating_sub(done.bytes);
                self.queue.transferred += done.bytes;
                self.hub.progress(self.queue.transferred);
                Some(Ok(done.output))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
