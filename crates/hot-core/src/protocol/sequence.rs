//! Per-connection outbound sequence numbering.
//!
//! # What is a sequence number here? (for beginners)
//!
//! Every envelope a connection sends carries an `order` value.  The values
//! for one connection and one direction are exactly `0, 1, 2, …` with no
//! gaps, so the receiver can tell which envelope comes next even when the
//! transport shuffles them.
//!
//! When one socket read is split into several chunks, all chunks of that read
//! must occupy *consecutive* order values.  [`Sequencer::reserve`] hands out a
//! whole block at once so nothing else can slip an envelope in between.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64`.  The body-pumping task and the dispatcher
//! may both emit for the same connection (for example a local failure racing
//! with the final `close`), and `fetch_add` guarantees they never receive
//! overlapping blocks.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe counter that assigns `order` values to outbound envelopes.
///
/// # Examples
///
/// ```rust
/// use hot_core::protocol::Sequencer;
///
/// let seq = Sequencer::new();
/// assert_eq!(seq.next(), 0);
/// assert_eq!(seq.reserve(3), 1..4);
/// assert_eq!(seq.current(), 4);
/// ```
#[derive(Debug)]
pub struct Sequencer {
    inner: AtomicU64,
}

impl Sequencer {
    /// Creates a sequencer whose first assigned order is 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Reserves a contiguous block of `count` order values.
    ///
    /// Returns `[start, start + count)` and advances the counter by `count`
    /// in one atomic step.  A reservation of 0 returns an empty range.
    pub fn reserve(&self, count: u64) -> Range<u64> {
        // `Relaxed` is enough: the counter only has to hand out disjoint
        // blocks, it does not publish any other memory.
        let start = self.inner.fetch_add(count, Ordering::Relaxed);
        start..start + count
    }

    /// Reserves a single order value.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the next order that will be assigned, without advancing.
    ///
    /// Another thread may reserve values before the caller acts on the
    /// result, so use this for logging and tests only.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
