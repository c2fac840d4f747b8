//! Reorder buffer: releases envelopes strictly in `order` sequence.
//!
//! # How it works (for beginners)
//!
//! The buffer is a min-heap keyed by `order` plus a counter holding the next
//! order the consumer expects (the *receive count*).  Arrivals are pushed
//! onto the heap in whatever order the transport delivers them.  Draining
//! pops the heap only while its smallest element is exactly the expected
//! order, so a gap (a missing predecessor) stops the drain until the missing
//! envelope shows up.
//!
//! ```text
//! expected = 0
//! arrivals:  2   0   1
//!            │   │   └─ drain yields 1, 2   (expected → 3)
//!            │   └───── drain yields 0      (expected → 1)
//!            └───────── drain yields nothing
//! ```
//!
//! Entries below the expected order can never become ready again.  They are
//! rejected on enqueue and discarded if already buffered, so a duplicate
//! delivery never blocks the head of the heap.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Heap slot ordered by `order` only.
#[derive(Debug)]
struct Pending<T> {
    order: u64,
    item: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.cmp(&other.order)
    }
}

/// Min-priority queue that yields items in gapless `order` sequence.
///
/// # Examples
///
/// ```rust
/// use hot_core::protocol::ReorderBuffer;
///
/// let mut buf = ReorderBuffer::new();
/// buf.enqueue(1, "b");
/// assert_eq!(buf.drain().count(), 0);
///
/// buf.enqueue(0, "a");
/// assert_eq!(buf.drain().collect::<Vec<_>>(), vec!["a", "b"]);
/// assert_eq!(buf.next_expected(), 2);
/// ```
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    heap: BinaryHeap<Reverse<Pending<T>>>,
    next_expected: u64,
}

impl<T> ReorderBuffer<T> {
    /// Creates an empty buffer expecting order 0.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_expected: 0,
        }
    }

    /// Buffers `item` under `order`.
    ///
    /// Returns `false`, dropping the item, when `order` was already consumed.
    pub fn enqueue(&mut self, order: u64, item: T) -> bool {
        if order < self.next_expected {
            return false;
        }
        self.heap.push(Reverse(Pending { order, item }));
        true
    }

    /// Returns an iterator over the maximal run of items that are now ready.
    ///
    /// Each yielded item advances [`next_expected`](Self::next_expected) by
    /// one.  Dropping the iterator early leaves the remaining ready items in
    /// the buffer.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { buffer: self }
    }

    /// The order the next released item must carry (the receive count).
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of items waiting for a predecessor.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Smallest buffered order, if any.
    pub fn lowest_pending(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(p)| p.order)
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`ReorderBuffer::drain`].
pub struct Drain<'a, T> {
    buffer: &'a mut ReorderBuffer<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            let head = self.buffer.heap.peek()?.0.order;
            if head < self.buffer.next_expected {
                // Duplicate of an order that was released already.
                self.buffer.heap.pop();
                continue;
            }
            if head != self.buffer.next_expected {
                return None;
            }
            let Reverse(pending) = self.buffer.heap.pop()?;
            self.buffer.next_expected += 1;
            return Some(pending.item);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
