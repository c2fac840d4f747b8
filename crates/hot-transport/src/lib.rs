//! hot-transport library crate.
//!
//! Concrete Transport Adapters for HTTP-over-Text.  Every adapter hands out a
//! [`Link`]: the outbound [`Transport`] plus a receiver of inbound texts.
//!
//! ```text
//! ┌──────────┐  send(text)   ┌───────────┐   text   ┌──────────┐
//! │ emitter  │ ────────────► │  adapter  │ ───────► │   peer   │
//! └──────────┘               └───────────┘          └──────────┘
//!      ▲            inbound receiver  │
//!      └──────────────────────────────┘
//! ```
//!
//! # Adapters
//!
//! - [`memory`] – two cross-wired links in one process, with optional
//!   random delivery delay.  Used by the loopback demo and tests.
//! - [`line`] – newline-delimited text over one TCP connection, for running
//!   the two halves on two machines.
//! - [`mock`] – records sent texts for assertions.
//!
//! Messaging-platform automations (chat clients) implement the same
//! [`Transport`] trait outside this workspace.

use std::sync::Arc;

use tokio::sync::mpsc;

pub use hot_core::transport::{Transport, TransportError};

/// Transport settings shared by the binaries.
pub mod config;

/// Newline-delimited TCP link.
pub mod line;

/// In-process link pair with delivery jitter.
pub mod memory;

/// Recording transport for tests.
pub mod mock;

pub use config::{load_or_default, load_toml, open_link, ConfigError, PeerMode, TransportConfig};

/// Both directions of one transport.
pub struct Link {
    /// Outbound half, shared by every connection of a dispatcher.
    pub transport: Arc<dyn Transport>,
    /// Texts received from the peer, in arrival order.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}
