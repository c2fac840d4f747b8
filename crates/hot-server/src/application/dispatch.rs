//! Backend dispatch: text envelopes ↔ upstream connections.
//!
//! The [`Backend`] is the mirror image of the proxy-side dispatcher.  It
//! learns about connections only from the envelopes that arrive, so records
//! are created lazily: the first envelope for an id that has never been seen
//! (and is not retired) creates one, whatever its frame.  Frames are then
//! released strictly in order, which is what guarantees `connect` is acted on
//! before any `data` even when the transport delivered them the other way
//! round.
//!
//! # Applying outgoing frames
//!
//! | Frame     | Action                                        | Record afterwards |
//! |-----------|-----------------------------------------------|-------------------|
//! | `connect` | [`Upstream::open`] with a fresh command pipe  | Connecting        |
//! | `data`    | [`PipeCommand::Write`]                        | unchanged         |
//! | `close`   | [`PipeCommand::End`]                          | retired (Closed)  |
//! | `error`   | [`PipeCommand::Abort`]                        | retired (Errored) |
//!
//! The upstream task reports back through [`UpstreamEvents`]: `established`
//! moves the record to Streaming, `finished` retires it.  Everything it
//! sends to the client goes straight out through its own [`Emitter`].

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hot_core::protocol::{
    decode_envelope, ConnectionId, Envelope, IncomingFrame, OutgoingFrame, ProtocolError,
};
use hot_core::{ConnectionRecord, ConnectionState, DispatchConfig, Emitter, RecordTable, Transport};

use crate::domain::{PipeCommand, UpstreamRequest};

// ── Upstream port ─────────────────────────────────────────────────────────────

/// Opens real upstream connections.
///
/// Implementations must not block: `open` is called on the dispatcher task
/// and is expected to spawn whatever does the I/O.
#[cfg_attr(test, mockall::automock)]
pub trait Upstream: Send {
    fn open(&self, request: UpstreamRequest, link: UpstreamLink);
}

/// Everything an upstream connection task needs to talk back.
#[derive(Debug)]
pub struct UpstreamLink {
    /// Sends incoming envelopes for this connection.
    pub emitter: Emitter<IncomingFrame>,
    /// Client bytes and half-close/abort requests, in client order.
    pub commands: mpsc::UnboundedReceiver<PipeCommand>,
    /// Lifecycle reports back to the dispatcher.
    pub events: UpstreamEvents,
}

/// Lifecycle reports from an upstream task about one connection.
#[derive(Debug, Clone)]
pub struct UpstreamEvents {
    id: ConnectionId,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl UpstreamEvents {
    pub fn new(id: ConnectionId, events: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self { id, events }
    }

    /// The upstream socket is connected.
    pub fn established(&self) {
        let _ = self
            .events
            .send(BackendEvent::Upstream(UpstreamEvent::Established(self.id)));
    }

    /// The upstream side is done; `failed` marks an error rather than a
    /// normal end.
    pub fn finished(&self, failed: bool) {
        let _ = self.events.send(BackendEvent::Upstream(UpstreamEvent::Finished {
            id: self.id,
            failed,
        }));
    }
}

/// Lifecycle change reported by an upstream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamEvent {
    Established(ConnectionId),
    Finished { id: ConnectionId, failed: bool },
}

/// Everything the [`Backend`] reacts to.
#[derive(Debug)]
pub enum BackendEvent {
    /// A text arrived from the transport.
    Inbound(String),
    Upstream(UpstreamEvent),
    /// Periodic idle-record collection.
    Sweep,
}

/// Per-record handle on the upstream task: `None` until `connect` is
/// applied.
#[derive(Debug, Default)]
pub struct BackendPipe {
    commands: Option<mpsc::UnboundedSender<PipeCommand>>,
}

impl BackendPipe {
    fn is_open(&self) -> bool {
        self.commands.is_some()
    }

    fn send(&self, id: ConnectionId, command: PipeCommand) {
        match &self.commands {
            Some(commands) => {
                if commands.send(command).is_err() {
                    debug!(%id, "upstream task already finished");
                }
            }
            None => debug!(%id, ?command, "no upstream yet; command dropped"),
        }
    }
}

type ServerRecord = ConnectionRecord<OutgoingFrame, BackendPipe>;

// ── Backend ───────────────────────────────────────────────────────────────────

/// Connector-side dispatcher.
pub struct Backend<U> {
    records: RecordTable<OutgoingFrame, BackendPipe>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    upstream: U,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl<U: Upstream> Backend<U> {
    /// `events` is handed to every upstream task for lifecycle reports; it
    /// should feed the receiver passed to [`run`](Self::run).
    pub fn new(
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
        upstream: U,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        Self {
            records: RecordTable::new(),
            transport,
            config,
            upstream,
            events,
        }
    }

    /// Number of connections currently live.
    pub fn live_connections(&self) -> usize {
        self.records.len()
    }

    /// State of the live record for `id`, if any.
    pub fn state_of(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.records.get(id).map(|record| record.state())
    }

    pub fn handle(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Inbound(text) => self.receive(&text),
            BackendEvent::Upstream(UpstreamEvent::Established(id)) => self.established(id),
            BackendEvent::Upstream(UpstreamEvent::Finished { id, failed }) => {
                let state = if failed {
                    ConnectionState::Errored
                } else {
                    ConnectionState::Closed
                };
                self.finish(id, state);
            }
            BackendEvent::Sweep => self.sweep(Instant::now()),
        }
    }

    /// Handles events until the channel closes.
    ///
    /// The dispatcher holds a sender of its own channel (for upstream
    /// tasks), so in practice this runs until the task is aborted.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<BackendEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!(live = self.records.len(), "backend dispatcher stopped");
    }

    /// Decodes one transport text and applies whatever it makes ready.
    pub fn receive(&mut self, text: &str) {
        match decode_envelope::<OutgoingFrame>(text) {
            Ok(envelope) => self.handle_envelope(envelope),
            Err(ProtocolError::UnexpectedDirection { found, .. }) => {
                debug!(%found, "ignoring envelope travelling the other way");
            }
            Err(e) => warn!("discarding malformed envelope: {e}"),
        }
    }

    /// Buffers a decoded envelope, creating the record on first sight, and
    /// applies every frame now in order.
    ///
    /// The request side's `close` retires the record even though the
    /// response may still be streaming back through the upstream emitter.
    /// A later `error` for that id (the local client leaving mid-download)
    /// therefore finds a retired record and is dropped: the upstream task
    /// runs to completion on its own and its envelopes are discarded by the
    /// proxy half, which has already retired the id as well.
    pub fn handle_envelope(&mut self, envelope: Envelope<OutgoingFrame>) {
        let Envelope { id, order, frame } = envelope;
        let ssl = frame.ssl();
        let Some(record) = self
            .records
            .get_or_create(id, || ConnectionRecord::new(id, ssl, BackendPipe::default()))
        else {
            debug!(%id, order, "envelope for a finished connection");
            return;
        };

        for frame in record.accept(order, frame) {
            if !self.apply(id, frame) {
                break;
            }
        }
    }

    /// Aborts every record that has neither received nor sent an envelope
    /// for the configured idle timeout.
    pub fn sweep(&mut self, now: Instant) {
        let Some(ttl) = self.config.idle_timeout else {
            return;
        };
        for mut record in self.records.sweep_idle(now, ttl) {
            record.pipe.send(record.id(), PipeCommand::Abort);
            if let Err(e) = record.advance(ConnectionState::Errored) {
                debug!("{e}");
            }
            emitter_for(&self.transport, &self.config, &record).error();
            warn!(id = %record.id(), idle_secs = ttl.as_secs(), "connection idle too long; aborted");
        }
    }

    // ── Frame application ─────────────────────────────────────────────────────

    /// Applies one in-order frame.  Returns `false` once the record is gone.
    fn apply(&mut self, id: ConnectionId, frame: OutgoingFrame) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };

        match frame {
            OutgoingFrame::ConnectHttp {
                method,
                url,
                headers,
            } => {
                self.connect(
                    id,
                    UpstreamRequest::Http {
                        method,
                        url,
                        headers,
                    },
                );
                true
            }
            OutgoingFrame::ConnectTunnel { url, head } => {
                self.connect(
                    id,
                    UpstreamRequest::Tunnel {
                        authority: url,
                        head,
                    },
                );
                true
            }
            OutgoingFrame::Data { data, .. } => {
                if record.pipe.is_open() {
                    record.pipe.send(id, PipeCommand::Write(data));
                } else {
                    warn!(%id, bytes = data.len(), "data before connect; dropped");
                }
                true
            }
            OutgoingFrame::Close { .. } => {
                record.pipe.send(id, PipeCommand::End);
                self.finish(id, ConnectionState::Closed);
                false
            }
            OutgoingFrame::Error { .. } => {
                record.pipe.send(id, PipeCommand::Abort);
                self.finish(id, ConnectionState::Errored);
                false
            }
        }
    }

    fn connect(&mut self, id: ConnectionId, request: UpstreamRequest) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if record.pipe.is_open() {
            warn!(%id, "ignoring repeated connect");
            return;
        }
        if let Err(e) = record.advance(ConnectionState::Connecting) {
            warn!("{e}");
            return;
        }

        record.set_ssl(request.ssl());
        let (commands, rx) = mpsc::unbounded_channel();
        record.pipe.commands = Some(commands);
        let link = UpstreamLink {
            emitter: emitter_for(&self.transport, &self.config, record),
            commands: rx,
            events: UpstreamEvents::new(id, self.events.clone()),
        };

        info!(%id, ssl = request.ssl(), target = request.target(), "opening upstream");
        self.upstream.open(request, link);
    }

    fn established(&mut self, id: ConnectionId) {
        if let Some(record) = self.records.get_mut(&id) {
            match record.advance(ConnectionState::Streaming) {
                Ok(()) => debug!(%id, "upstream established"),
                Err(e) => debug!("{e}"),
            }
        }
    }

    fn finish(&mut self, id: ConnectionId, state: ConnectionState) {
        if let Some(mut record) = self.records.retire(&id) {
            if let Err(e) = record.advance(state) {
                debug!("{e}");
            }
            info!(
                %id,
                %state,
                received = record.receive_count(),
                "connection finished"
            );
        }
    }
}

fn emitter_for(
    transport: &Arc<dyn Transport>,
    config: &DispatchConfig,
    record: &ServerRecord,
) -> Emitter<IncomingFrame> {
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
