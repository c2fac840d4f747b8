//! hot-server library crate.
//!
//! The connector half of HTTP-over-Text.  It reads the text envelopes the
//! proxy half sends, opens the real upstream connection each one names, and
//! streams what the upstream answers back as envelopes of its own.
//!
//! # Architecture
//!
//! ```text
//! text transport  (hot-transport)
//!         ↕
//! [hot-server]
//!   ├── domain/           UpstreamRequest, PipeCommand
//!   ├── application/      Backend dispatcher and the Upstream port
//!   └── infrastructure/
//!         ├── upstream    TCP tunnels and the hyper HTTP/1 client
//!         ├── runner      dispatcher task + transport forwarder
//!         └── config      TOML file
//!         ↕
//! Internet hosts  (TCP, HTTP/1)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `hot-core`; it reaches the network
//!   only through the [`application::Upstream`] trait.
//! - `infrastructure` depends on everything plus `hyper` and `tokio`.

/// Domain layer: upstream requests and pipe commands.
pub mod domain;

/// Application layer: the Backend dispatcher.
pub mod application;

/// Infrastructure layer: upstream connector, dispatcher runner, config file.
pub mod infrastructure;
