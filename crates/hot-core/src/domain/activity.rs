//! Last-activity timestamp shared by a record and its emitters.
//!
//! The dispatcher refreshes it when an inbound envelope is accepted; emitter
//! clones running on other tasks refresh it on every send.  Idle collection
//! reads the most recent of the two, so a connection streaming in only one
//! direction is never mistaken for a stalled one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic "last seen" instant that can be updated from any thread.
///
/// Stored as nanoseconds since a fixed origin so updates are a single
/// `fetch_max`; an older instant never overwrites a newer one.
pub struct Activity {
    origin: Instant,
    since_origin: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            since_origin: AtomicU64::new(0),
        }
    }

    /// Records activity now.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Records activity at `at`.  Instants before the latest one are ignored.
    pub fn touch_at(&self, at: Instant) {
        let nanos = u64::try_from(at.saturating_duration_since(self.origin).as_nanos())
            .unwrap_or(u64::MAX);
        self.since_origin.fetch_max(nanos, Ordering::Relaxed);
    }

    /// The most recent recorded activity.
    pub fn last(&self) -> Instant {
        self.origin + Duration::from_nanos(self.since_origin.load(Ordering::Relaxed))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("idle_for", &self.last().elapsed())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
