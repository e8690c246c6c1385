// src/rabbitmq/handoff.rs
// Bounded hand-off between application threads and a publisher loop.

use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tokio_util::sync::CancellationToken;

/// A bounded FIFO shared by any number of producer threads and one draining
/// publisher loop.
///
/// Inserts never grow the queue past its capacity: depending on the call they
/// fail immediately, wait up to a timeout, or block until there is room.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for HandoffQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> HandoffQueue<T> {
    /// A queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Inserts without waiting; `false` when the queue is full.
    pub fn offer(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Waits up to `timeout` for room; `false` if none became free.
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> bool {
        self.tx.send_timeout(item, timeout).is_ok()
    }

    /// Blocks until there is room or `cancel` fires. Returns whether the item
    /// was queued.
    pub fn put(&self, item: T, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        futures::executor::block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                sent = self.insert(item) => sent,
            }
        })
    }

    /// Waits for room and inserts; the async form of [`HandoffQueue::put`].
    pub async fn insert(&self, item: T) -> bool {
        self.tx.send_async(item).await.is_ok()
    }

    /// Waits for the next item. Used by the draining side only.
    pub async fn take(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
