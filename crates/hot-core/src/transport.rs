//! Transport Adapter contract.
//!
//! A transport moves opaque text messages to the remote peer.  Concrete
//! adapters (a chat automation, a TCP line link, an in-memory pair for
//! tests) live outside this crate; the protocol core only needs `send`.
//!
//! Assumed properties of every adapter:
//!
//! - Messages may arrive out of order and may be lost.
//! - Messages are not duplicated.
//! - `send` never blocks.  Several connections share one adapter, so the
//!   adapter serialises its own transmissions (for example through a single
//!   writer task).

use thiserror::Error;

/// Errors a transport may report from [`Transport::send`].
///
/// The core treats every send as best-effort: it logs these and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer side or the adapter's writer has shut down.
    #[error("transport is closed")]
    Closed,

    /// The adapter refused the message.
    #[error("transport rejected the message: {0}")]
    Rejected(String),
}

/// Outbound half of a Transport Adapter.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Queues `text` for delivery to the peer and returns immediately.
    fn send(&self, text: String) -> Result<(), TransportError>;
}
