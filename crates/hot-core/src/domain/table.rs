//! The dispatcher-owned map of live Connection Records.
//!
//! Each dispatcher instance owns exactly one table, so several independent
//! dispatchers can live in one process (the loopback demo and the tests rely
//! on that).
//!
//! Destroyed identifiers are remembered as *retired* so a trailing envelope
//! cannot lazily recreate a record for a connection that already ended.  The
//! retired set is a bounded FIFO: the oldest tombstones are forgotten first.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::domain::record::ConnectionRecord;
use crate::protocol::envelope::ConnectionId;

/// How many retired identifiers a table remembers.
pub const RETIRED_CAPACITY: usize = 8192;

/// Live records keyed by identifier, plus tombstones for destroyed ones.
#[derive(Debug)]
pub struct RecordTable<In, P> {
    live: HashMap<ConnectionId, ConnectionRecord<In, P>>,
    retired: HashSet<ConnectionId>,
    retired_order: VecDeque<ConnectionId>,
    retired_capacity: usize,
}

impl<In, P> RecordTable<In, P> {
    pub fn new() -> Self {
        Self::with_retired_capacity(RETIRED_CAPACITY)
    }

    /// Creates a table that remembers at most `capacity` retired ids.
    pub fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            live: HashMap::new(),
            retired: HashSet::new(),
            retired_order: VecDeque::new(),
            retired_capacity: capacity,
        }
    }

    /// Registers `record`, replacing nothing: a live or retired id is refused
    /// and the record is handed back.
    pub fn insert(
        &mut self,
        record: ConnectionRecord<In, P>,
    ) -> Result<&mut ConnectionRecord<In, P>, ConnectionRecord<In, P>> {
        let id = record.id();
        if self.retired.contains(&id) {
            return Err(record);
        }
        match self.live.entry(id) {
            Entry::Occupied(_) => Err(record),
            Entry::Vacant(slot) => Ok(slot.insert(record)),
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionRecord<In, P>> {
        self.live.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut ConnectionRecord<In, P>> {
        self.live.get_mut(id)
    }

    /// Returns the live record for `id`, creating it with `create` if this
    /// id has never been seen.  Returns `None` for retired ids.
    pub fn get_or_create(
        &mut self,
        id: ConnectionId,
        create: impl FnOnce() -> ConnectionRecord<In, P>,
    ) -> Option<&mut ConnectionRecord<In, P>> {
        if self.retired.contains(&id) {
            return None;
        }
        Some(self.live.entry(id).or_insert_with(create))
    }

    /// Removes the record for `id` and remembers the id as retired.
    pub fn retire(&mut self, id: &ConnectionId) -> Option<ConnectionRecord<In, P>> {
        let record = self.live.remove(id);
        if self.retired_capacity > 0 && self.retired.insert(*id) {
            self.retired_order.push_back(*id);
            while self.retired_order.len() > self.retired_capacity {
                if let Some(oldest) = self.retired_order.pop_front() {
                    self.retired.remove(&oldest);
                }
            }
        }
        record
    }

    pub fn is_retired(&self, id: &ConnectionId) -> bool {
        self.retired.contains(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.live.contains_key(id)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Retires every record idle for at least `ttl` as of `now` and returns
    /// them so the caller can tear down their pipes.
    pub fn sweep_idle(&mut self, now: Instant, ttl: Duration) -> Vec<ConnectionRecord<In, P>> {
        let stale: Vec<ConnectionId> = self
            .live
            .values()
            .filter(|r| now.saturating_duration_since(r.last_activity()) >= ttl)
            .map(|r| r.id())
            .collect();
        stale.iter().filter_map(|id| self.retire(id)).collect()
    }
}

impl<In, P> Default for RecordTable<In, P> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
