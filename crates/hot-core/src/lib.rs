//! # hot-core
//!
//! Shared library for HTTP-over-Text containing the envelope model, the text
//! codec, per-connection sequencing and the reorder buffer.
//!
//! This crate is used by both the client (proxy-facing) and server
//! (upstream-facing) halves of the tunnel.  It has no dependency on sockets,
//! HTTP libraries, or an async runtime.
//!
//! # Architecture overview (for beginners)
//!
//! HTTP-over-Text carries ordinary HTTP and HTTPS proxy traffic across a
//! channel that can only move short text messages, such as a chat
//! conversation.  Messages on such a channel may arrive in any order, so every
//! byte event is wrapped in a small self-describing *envelope* that carries a
//! connection identifier and a sequence number.
//!
//! This crate (`hot-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes become text.  Payloads are base64-encoded,
//!   split into size-bounded chunks, numbered by a [`Sequencer`], serialised
//!   into JSON envelopes, and put back in order by a [`ReorderBuffer`].
//!
//! - **`domain`** – Per-connection state.  A [`ConnectionRecord`] owns the
//!   real I/O handle and the counters for one tunnelled connection, and a
//!   [`RecordTable`] holds every live record of one dispatcher.
//!
//! - **`transport`** – The contract a messaging-platform adapter implements:
//!   a non-blocking `send(text)`.

pub mod domain;
pub mod protocol;
pub mod transport;

pub use domain::activity::Activity;
pub use domain::config::DispatchConfig;
pub use domain::emitter::Emitter;
pub use domain::record::{ConnectionRecord, ConnectionState, LifecycleError};
pub use domain::table::RecordTable;
pub use protocol::codec::{decode_envelope, encode_envelope, ProtocolError};
pub use protocol::envelope::{
    ConnectionId, Direction, Envelope, Frame, FrameKind, HeaderSet, IncomingFrame, OutgoingFrame,
};
pub use protocol::reorder::ReorderBuffer;
pub use protocol::sequence::Sequencer;
pub use transport::{Transport, TransportError};
