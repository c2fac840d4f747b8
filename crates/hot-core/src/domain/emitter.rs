//! Outbound envelope production for one connection.
//!
//! An [`Emitter`] is the sending half of a Connection Record.  Whoever
//! observes local byte events for a connection (the task reading a request
//! body, the task reading an upstream socket) holds a clone and calls
//! [`emit_data`](Emitter::emit_data), then [`close`](Emitter::close) or
//! [`error`](Emitter::error).
//!
//! All clones of one emitter share a [`Sequencer`], so the `order` values of
//! one `(id, direction)` stay gapless no matter which clone sends.  They also
//! share the record's [`Activity`] cell: every send counts as activity, so
//! idle collection leaves one-way streams alone.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::activity::Activity;
use crate::protocol::chunker::chunk;
use crate::protocol::codec::encode_envelope;
use crate::protocol::envelope::{ConnectionId, Envelope, Frame};
use crate::protocol::sequence::Sequencer;
use crate::transport::Transport;

/// Sends sequenced envelopes of frame type `F` for one connection.
pub struct Emitter<F> {
    id: ConnectionId,
    ssl: bool,
    sequencer: Arc<Sequencer>,
    activity: Arc<Activity>,
    transport: Arc<dyn Transport>,
    chunk_size: usize,
    _frame: PhantomData<fn() -> F>,
}

impl<F> Clone for Emitter<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            ssl: self.ssl,
            sequencer: Arc::clone(&self.sequencer),
            activity: Arc::clone(&self.activity),
            transport: Arc::clone(&self.transport),
            chunk_size: self.chunk_size,
            _frame: PhantomData,
        }
    }
}

impl<F> fmt::Debug for Emitter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("id", &self.id)
            .field("ssl", &self.ssl)
            .field("next_order", &self.sequencer.current())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl<F: Frame> Emitter<F> {
    pub fn new(
        id: ConnectionId,
        ssl: bool,
        sequencer: Arc<Sequencer>,
        transport: Arc<dyn Transport>,
        chunk_size: usize,
    ) -> Self {
        Self {
            id,
            ssl,
            sequencer,
            activity: Arc::new(Activity::new()),
            transport,
            chunk_size,
            _frame: PhantomData,
        }
    }

    /// Reports sends to `activity` instead of a private cell.  Dispatchers
    /// pass the record's cell here.
    pub fn with_activity(mut self, activity: Arc<Activity>) -> Self {
        self.activity = activity;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    /// Sends `frame` under the next order value.
    pub fn emit(&self, frame: F) {
        let order = self.sequencer.next();
        self.post(Envelope::new(self.id, order, frame));
    }

    /// Sends `data` as one or more `data` envelopes.
    ///
    /// The chunks of one call occupy consecutive order values.  An empty
    /// buffer sends nothing.
    pub fn emit_data(&self, data: Bytes) {
        let chunks = chunk(&data, self.chunk_size);
        let block = self.sequencer.reserve(chunks.len() as u64);
        for (order, piece) in block.zip(chunks) {
            self.post(Envelope::new(self.id, order, F::data(self.ssl, piece)));
        }
    }

    /// Sends the terminal `close` frame.
    pub fn close(&self) {
        self.emit(F::close(self.ssl));
    }

    /// Sends the terminal `error` frame.
    pub fn error(&self) {
        self.emit(F::error(self.ssl));
    }

    fn post(&self, envelope: Envelope<F>) {
        self.activity.touch();
        let text = match encode_envelope(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(id = %self.id, order = envelope.order, "dropping unencodable envelope: {e}");
                return;
            }
        };
        debug!(
            id = %self.id,
            order = envelope.order,
            kind = %envelope.frame.kind(),
            direction = %F::DIRECTION,
            "send"
        );
        if let Err(e) = self.transport.send(text) {
            warn!(id = %self.id, order = envelope.order, "transport send failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode_envelope;
    use crate::protocol::envelope::{IncomingFrame, OutgoingFrame};
    use crate::transport::{MockTransport, TransportError};
    use std::sync::Mutex;

    /// Builds a mock that stores every sent text in `sink`.
    fn capturing_mock(sink: Arc<Mutex<Vec<String>>>) -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_send().returning(move |text| {
            sink.lock().unwrap().push(text);
            Ok(())
        });
        mock
    }

    fn decode_all<F: Frame>(sink: &Mutex<Vec<String>>) -> Vec<Envelope<F>> {
        sink.lock()
            .unwrap()
            .iter()
            .map(|t| decode_envelope::<F>(t).unwrap())
            .collect()
    }

    #[test]
    fn test_emit_data_reserves_consecutive_orders_per_chunk() {
        // Arrange
        let sink = Arc::new(Mutex::new(Vec::new()));
        let emitter: Emitter<OutgoingFrame> = Emitter::new(
            ConnectionId::new(),
            true,
            Arc::new(Sequencer::new()),
            Arc::new(capturing_mock(Arc::clone(&sink))),
            4,
        );

        // Act
        emitter.emit_data(Bytes::from_static(b"0123456789"));
        emitter.close();

        // Assert
        let sent = decode_all::<OutgoingFrame>(&sink);
        let orders: Vec<u64> = sent.iter().map(|e| e.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
        assert_eq!(
            sent[2].frame,
            OutgoingFrame::Data {
                ssl: true,
                data: Bytes::from_static(b"89")
            }
        );
        assert_eq!(sent[3].frame, OutgoingFrame::Close { ssl: true });
    }

    #[test]
    fn test_empty_data_sends_nothing_and_keeps_order() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send().times(1).returning(|_| Ok(()));
        let seq = Arc::new(Sequencer::new());
        let emitter: Emitter<IncomingFrame> =
            Emitter::new(ConnectionId::new(), false, Arc::clone(&seq), Arc::new(mock), 0);

        // Act
        emitter.emit_data(Bytes::new());
        emitter.close();

        // Assert: only the close went out, at order 0
        assert_eq!(seq.current(), 1);
    }

    #[test]
    fn test_send_failure_is_not_fatal_and_still_consumes_order() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(2)
            .returning(|_| Err(TransportError::Closed));
        let seq = Arc::new(Sequencer::new());
        let emitter: Emitter<IncomingFrame> =
            Emitter::new(ConnectionId::new(), false, Arc::clone(&seq), Arc::new(mock), 0);

        // Act
        emitter.emit(IncomingFrame::ConnectTunnel);
        emitter.error();

        // Assert
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn test_every_send_touches_the_shared_activity() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send().returning(|_| Ok(()));
        let activity = Arc::new(Activity::new());
        let created = activity.last();
        let emitter: Emitter<IncomingFrame> =
            Emitter::new(ConnectionId::new(), false, Arc::new(Sequencer::new()), Arc::new(mock), 0)
                .with_activity(Arc::clone(&activity));
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Act
        emitter.clone().emit_data(Bytes::from_static(b"payload"));

        // Assert
        assert!(activity.last() > created);
    }

    #[test]
    fn test_clones_share_one_sequence() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let emitter: Emitter<IncomingFrame> = Emitter::new(
            ConnectionId::new(),
            false,
            Arc::new(Sequencer::new()),
            Arc::new(capturing_mock(Arc::clone(&sink))),
            0,
        );
        let clone = emitter.clone();

        emitter.emit_data(Bytes::from_static(b"a"));
        clone.emit_data(Bytes::from_static(b"b"));
        emitter.close();

        let orders: Vec<u64> = decode_all::<IncomingFrame>(&sink)
            .iter()
            .map(|e| e.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(clone.id(), emitter.id());
    }
}
