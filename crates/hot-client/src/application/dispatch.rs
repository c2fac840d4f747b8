//! Frontend dispatch: local proxy connections ↔ text envelopes.
//!
//! The [`Frontend`] owns one Connection Record per local client connection.
//! It is the only place records are created, looked up and retired, and it
//! runs on a single task: every input (a new local request, a text from the
//! transport, a local failure, a sweep tick) arrives as a [`FrontendEvent`]
//! and is handled to completion before the next one.
//!
//! # Data flow
//!
//! ```text
//! local client ──request──► proxy listener ──Open──► Frontend ──connect#0──► transport
//!                            (Emitter: data#1.., close/error)          ─────► transport
//!
//! transport ──Inbound(text)──► Frontend ──decode, reorder──► ClientPipe ──► local client
//! ```
//!
//! The outgoing direction after `connect` does not pass through the
//! dispatcher at all: the listener task holds the connection's [`Emitter`],
//! whose sequencer is shared with the record.
//!
//! # Applying incoming frames
//!
//! | Frame     | Pipe call                         | Record afterwards |
//! |-----------|-----------------------------------|-------------------|
//! | `connect` | `write_head(Http / Tunnel)`       | Streaming         |
//! | `data`    | `write(bytes)`                    | unchanged         |
//! | `close`   | `end()`                           | retired (Closed)  |
//! | `error`   | `fail()`                          | retired (Errored) |
//!
//! A pipe call that reports [`PipeClosed`] is a local failure: the remote
//! half is told with an outgoing `error` and the record is retired.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use hot_core::protocol::{
    decode_envelope, ConnectionId, Envelope, IncomingFrame, OutgoingFrame, ProtocolError,
};
use hot_core::{ConnectionRecord, ConnectionState, DispatchConfig, Emitter, RecordTable, Transport};

use crate::domain::{LocalRequest, ResponseHead};

/// The local client connection has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("local client connection is closed")]
pub struct PipeClosed;

/// Write side of one local client connection, as seen by the dispatcher.
///
/// Infrastructure implementations forward to a hyper response or an
/// upgraded socket; tests record the calls.
pub trait ClientPipe: Send {
    /// Delivers the response head.  Called at most once.
    fn write_head(&mut self, head: ResponseHead) -> Result<(), PipeClosed>;

    /// Delivers response (or tunnel) bytes.
    fn write(&mut self, data: Bytes) -> Result<(), PipeClosed>;

    /// The remote side finished normally.
    fn end(&mut self);

    /// The remote side failed; tear the local connection down.
    fn fail(&mut self);
}

/// Everything the [`Frontend`] reacts to.
pub enum FrontendEvent {
    /// A local client sent a request head.  The reply carries the emitter
    /// for the outgoing direction.
    Open {
        request: LocalRequest,
        pipe: Box<dyn ClientPipe>,
        reply: oneshot::Sender<Emitter<OutgoingFrame>>,
    },
    /// A text arrived from the transport.
    Inbound(String),
    /// The local side of a connection broke outside a pipe call (for
    /// example the client dropped a response body half way).
    LocalFailed(ConnectionId),
    /// Periodic idle-record collection.
    Sweep,
}

type ClientRecord = ConnectionRecord<IncomingFrame, Box<dyn ClientPipe>>;

// ── Frontend ──────────────────────────────────────────────────────────────────

/// Proxy-side dispatcher.
pub struct Frontend {
    records: RecordTable<IncomingFrame, Box<dyn ClientPipe>>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Frontend {
    pub fn new(transport: Arc<dyn Transport>, config: DispatchConfig) -> Self {
        Self {
            records: RecordTable::new(),
            transport,
            config,
        }
    }

    /// Number of connections currently live.
    pub fn live_connections(&self) -> usize {
        self.records.len()
    }

    /// Handles one event to completion.
    pub fn handle(&mut self, event: FrontendEvent) {
        match event {
            FrontendEvent::Open {
                request,
                pipe,
                reply,
            } => {
                let emitter = self.open(request, pipe);
                if let Err(emitter) = reply.send(emitter) {
                    debug!(id = %emitter.id(), "local client left before open completed");
                    self.local_failed(emitter.id());
                }
            }
            FrontendEvent::Inbound(text) => self.receive(&text),
            FrontendEvent::LocalFailed(id) => self.local_failed(id),
            FrontendEvent::Sweep => self.sweep(Instant::now()),
        }
    }

    /// Handles events until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<FrontendEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!(live = self.records.len(), "frontend dispatcher stopped");
    }

    /// Registers a new local connection and announces it with `connect` at
    /// order 0.  Returns the emitter for the rest of the outgoing stream.
    pub fn open(&mut self, request: LocalRequest, pipe: Box<dyn ClientPipe>) -> Emitter<OutgoingFrame> {
        let mut id = ConnectionId::new();
        while self.records.contains(&id) || self.records.is_retired(&id) {
            id = ConnectionId::new();
        }

        let ssl = request.ssl();
        let mut record = ConnectionRecord::new(id, ssl, pipe);
        if let Err(e) = record.advance(ConnectionState::Connecting) {
            warn!("{e}");
        }
        let emitter = emitter_for(&self.transport, &self.config, &record);
        info!(%id, ssl, target = request.target(), "opening connection");
        if self.records.insert(record).is_err() {
            warn!(%id, "connection id already registered");
        }

        emitter.emit(request.into_connect_frame());
        emitter
    }

    /// Decodes one transport text and applies whatever it makes ready.
    pub fn receive(&mut self, text: &str) {
        match decode_envelope::<IncomingFrame>(text) {
            Ok(envelope) => self.handle_envelope(envelope),
            Err(ProtocolError::UnexpectedDirection { found, .. }) => {
                debug!(%found, "ignoring envelope travelling the other way");
            }
            Err(e) => warn!("discarding malformed envelope: {e}"),
        }
    }

    /// Buffers a decoded envelope and applies every frame now in order.
    pub fn handle_envelope(&mut self, envelope: Envelope<IncomingFrame>) {
        let Envelope { id, order, frame } = envelope;
        let Some(record) = self.records.get_mut(&id) else {
            debug!(%id, order, "no live connection for envelope");
            return;
        };

        for frame in record.accept(order, frame) {
            if !self.apply(id, frame) {
                break;
            }
        }
    }

    /// Aborts a live connection from the local side: the pipe is failed,
    /// the remote half gets an outgoing `error`, the record is retired.
    pub fn local_failed(&mut self, id: ConnectionId) {
        let Some(mut record) = self.records.retire(&id) else {
            debug!(%id, "local failure for a connection that already finished");
            return;
        };
        if let Err(e) = record.advance(ConnectionState::Errored) {
            debug!("{e}");
        }
        record.pipe.fail();
        emitter_for(&self.transport, &self.config, &record).error();
        warn!(%id, "local connection failed; aborting");
    }

    /// Aborts every record that has neither received nor sent an envelope
    /// for the configured idle timeout.  A no-op when the timeout is off.
    pub fn sweep(&mut self, now: Instant) {
        let Some(ttl) = self.config.idle_timeout else {
            return;
        };
        for mut record in self.records.sweep_idle(now, ttl) {
            if let Err(e) = record.advance(ConnectionState::Errored) {
                debug!("{e}");
            }
            record.pipe.fail();
            emitter_for(&self.transport, &self.config, &record).error();
            warn!(id = %record.id(), idle_secs = ttl.as_secs(), "connection idle too long; aborted");
        }
    }

    // ── Frame application ─────────────────────────────────────────────────────

    /// Applies one in-order frame.  Returns `false` once the record is gone.
    fn apply(&mut self, id: ConnectionId, frame: IncomingFrame) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };

        match frame {
            IncomingFrame::ConnectHttp { status, headers } => {
                self.deliver_head(id, ResponseHead::Http { status, headers })
            }
            IncomingFrame::ConnectTunnel => self.deliver_head(id, ResponseHead::TunnelEstablished),
            IncomingFrame::Data(data) => {
                if record.pipe.write(data).is_err() {
                    self.local_failed(id);
                    return false;
                }
                true
            }
            IncomingFrame::Close => {
                record.pipe.end();
                self.finish(id, ConnectionState::Closed);
                false
            }
            IncomingFrame::Error => {
                record.pipe.fail();
                self.finish(id, ConnectionState::Errored);
                false
            }
        }
    }

    fn deliver_head(&mut self, id: ConnectionId, head: ResponseHead) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        if let Err(e) = record.advance(ConnectionState::Streaming) {
            warn!("ignoring repeated connect: {e}");
            return true;
        }
        if record.pipe.write_head(head).is_err() {
            self.local_failed(id);
            return false;
        }
        debug!(%id, "response head delivered");
        true
    }

    fn finish(&mut self, id: ConnectionId, state: ConnectionState) {
        if let Some(mut record) = self.records.retire(&id) {
            if let Err(e) = record.advance(state) {
                debug!("{e}");
            }
            info!(
                %id,
                %state,
                sent = record.send_count(),
                received = record.receive_count(),
                "connection finished"
            );
        }
    }
}

fn emitter_for(
    transport: &Arc<dyn Transport>,
    config: &DispatchConfig,
    record: &ClientRecord,
) -> Emitter<OutgoingFrame> {
    Emitter::new(
        record.id(),
        record.ssl(),
        record.sequencer(),
        Arc::clone(transport),
        config.chunk_size,
    )
    .with_activity(record.activity())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
