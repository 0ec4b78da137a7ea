//! Claim-once work queue.
//!
//! The queue is filled completely before any worker starts and then drained
//! concurrently. Population takes `&mut self`, draining only `&self`, so
//! the two phases cannot overlap. Claims advance an atomic cursor over the
//! fixed item array; an empty queue is final and workers exit on `None`.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct WorkQueue<T> {
    items: Vec<T>,
    next: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            next: AtomicUsize::new(0),
        }
    }

    /// Append an item. Only possible before the queue is shared.
    pub fn enqueue(&mut self, item: T) {
        self.items.push(item);
    }

    /// Claim the next item, or `None` once every item has been claimed.
    ///
    /// Each item is returned to exactly one caller.
    pub fn try_dequeue(&self) -> Option<&T> {
        let len = self.items.len();
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| {
                (i < len).then_some(i + 1)
            })
            .ok()
            .map(|i| &self.items[i])
    }

    /// Items not yet claimed
    pub fn remaining(&self) -> usize {
        self.items.len() - self.next.load(Ordering::Relaxed).min(self.items.len())
    }
}
