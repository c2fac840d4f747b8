//! Connection Record: the per-identifier state a dispatcher keeps.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!             ┌──────────► Closed ◄──────────┐
//!             │              ▲               │
//!  Created ──►Connecting ──► Streaming ──────┤
//!             │              │               │
//!             └──────────► Errored ◄─────────┘
//! ```
//!
//! `Connecting → Streaming` happens when the real connection opens, and
//! `Connecting → Errored` when opening fails.  A `close` may arrive while
//! the upstream is still opening (a GET with an empty body closes its
//! request side immediately), so `Connecting → Closed` is allowed too.
//! `Closed` and `Errored` are terminal: no transition leaves them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::domain::activity::Activity;
use crate::protocol::envelope::ConnectionId;
use crate::protocol::reorder::ReorderBuffer;
use crate::protocol::sequence::Sequencer;

/// Lifecycle state of one tunnelled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    Streaming,
    Closed,
    Errored,
}

impl ConnectionState {
    /// Returns `true` for `Closed` and `Errored`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    fn allows(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Created, Connecting | Closed | Errored)
                | (Connecting, Streaming | Closed | Errored)
                | (Streaming, Closed | Errored)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An illegal lifecycle transition was requested.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection {id}: illegal transition {from} -> {to}")]
pub struct LifecycleError {
    pub id: ConnectionId,
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Mutable state for one connection identifier.
///
/// - `In` is the frame type this side *receives* (buffered for reordering).
/// - `P` is the real I/O handle the record owns: a local response pipe on
///   the client, an upstream command channel on the server.
#[derive(Debug)]
pub struct ConnectionRecord<In, P> {
    id: ConnectionId,
    ssl: bool,
    state: ConnectionState,
    /// Real I/O handle.
    pub pipe: P,
    /// Next order to assign when emitting (the send count).
    send: Arc<Sequencer>,
    /// Reorder queue plus the next order expected (the receive count).
    inbound: ReorderBuffer<In>,
    /// Refreshed by inbound envelopes here and by sends in every emitter.
    activity: Arc<Activity>,
}

impl<In, P> ConnectionRecord<In, P> {
    /// Creates a record in [`ConnectionState::Created`] with both counters at 0.
    pub fn new(id: ConnectionId, ssl: bool, pipe: P) -> Self {
        Self {
            id,
            ssl,
            state: ConnectionState::Created,
            pipe,
            send: Arc::new(Sequencer::new()),
            inbound: ReorderBuffer::new(),
            activity: Arc::new(Activity::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn set_ssl(&mut self, ssl: bool) {
        self.ssl = ssl;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] and leaves the state unchanged if the
    /// transition is illegal.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), LifecycleError> {
        if !self.state.allows(next) {
            return Err(LifecycleError {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// The shared outbound sequencer, for building an emitter.
    pub fn sequencer(&self) -> Arc<Sequencer> {
        Arc::clone(&self.send)
    }

    /// Next order that will be assigned to an outbound envelope.
    pub fn send_count(&self) -> u64 {
        self.send.current()
    }

    /// Next inbound order this record will apply.
    pub fn receive_count(&self) -> u64 {
        self.inbound.next_expected()
    }

    /// Number of inbound frames waiting for a predecessor.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Buffers an inbound frame and returns every frame now ready to apply,
    /// in order.
    ///
    /// A frame whose order was already applied is dropped.
    pub fn accept(&mut self, order: u64, frame: In) -> Vec<In> {
        self.activity.touch();
        if !self.inbound.enqueue(order, frame) {
            tracing::debug!(id = %self.id, order, "dropping already-applied order");
            return Vec::new();
        }
        self.inbound.drain().collect()
    }

    /// The shared activity cell, for building an emitter.
    pub fn activity(&self) -> Arc<Activity> {
        Arc::clone(&self.activity)
    }

    /// When this record last accepted an inbound envelope or one of its
    /// emitters last sent one (or when it was created).
    pub fn last_activity(&self) -> Instant {
        self.activity.last()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn record() -> ConnectionRecord<&'static str, ()> {
        ConnectionRecord::new(ConnectionId::new(), false, ())
    }

    #[test]
    fn test_new_record_starts_created_with_zero_counters() {
        let rec = record();
        assert_eq!(rec.state(), Created);
        assert_eq!(rec.send_count(), 0);
        assert_eq!(rec.receive_count(), 0);
        assert_eq!(rec.buffered(), 0);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut rec = record();
        rec.advance(Connecting).unwrap();
        rec.advance(Streaming).unwrap();
        rec.advance(Closed).unwrap();
        assert!(rec.state().is_terminal());
    }

    #[test]
    fn test_connect_failure_goes_to_errored() {
        let mut rec = record();
        rec.advance(Connecting).unwrap();
        rec.advance(Errored).unwrap();
        assert_eq!(rec.state(), Errored);
    }

    #[test]
    fn test_terminal_states_reject_every_transition() {
        for terminal in [Closed, Errored] {
            for next in [Created, Connecting, Streaming, Closed, Errored] {
                // Arrange
                let mut rec = record();
                rec.advance(terminal).unwrap();

                // Act
                let result = rec.advance(next);

                // Assert
                assert!(result.is_err(), "{terminal} -> {next} must be rejected");
                assert_eq!(rec.state(), terminal);
            }
        }
    }

    #[test]
    fn test_streaming_cannot_go_back_to_connecting() {
        let mut rec = record();
        rec.advance(Connecting).unwrap();
        rec.advance(Streaming).unwrap();
        let err = rec.advance(Connecting).unwrap_err();
        assert_eq!(err.from, Streaming);
        assert_eq!(err.to, Connecting);
    }

    #[test]
    fn test_accept_releases_contiguous_frames() {
        // Arrange
        let mut rec = record();

        // Act / Assert
        assert!(rec.accept(1, "b").is_empty());
        assert_eq!(rec.buffered(), 1);
        assert_eq!(rec.accept(0, "a"), vec!["a", "b"]);
        assert_eq!(rec.receive_count(), 2);
        assert!(rec.accept(0, "a-again").is_empty());
    }

    #[test]
    fn test_activity_cell_is_shared_with_emitters() {
        // Arrange
        let rec = record();
        let later = rec.last_activity() + std::time::Duration::from_secs(30);

        // Act: an emitter on another task touches its clone of the cell
        rec.activity().touch_at(later);

        // Assert
        assert_eq!(rec.last_activity(), later);
    }

    #[test]
    fn test_sequencer_is_shared_with_emitters() {
        let rec = record();
        let seq = rec.sequencer();
        seq.reserve(3);
        assert_eq!(rec.send_count(), 3);
    }
}
