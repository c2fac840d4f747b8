//! hot-client library crate.
//!
//! The proxy half of HTTP-over-Text.  It accepts ordinary HTTP proxy traffic
//! from local browsers and tools, turns every request or `CONNECT` tunnel
//! into a stream of text envelopes, and writes the remote half's answers
//! back to the local client.
//!
//! # Architecture
//!
//! ```text
//! Browser / curl  (HTTP proxy protocol)
//!         ↕
//! [hot-client]
//!   ├── domain/           LocalRequest, ResponseHead
//!   ├── application/      Frontend dispatcher (records, reordering, pipes)
//!   └── infrastructure/
//!         ├── proxy_listener  hyper HTTP/1 server with CONNECT upgrades
//!         ├── runner          dispatcher task + transport forwarder
//!         └── config          TOML file
//!         ↕
//! text transport  (hot-transport)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `hot-core`; it never opens a socket.
//! - `infrastructure` depends on everything plus `hyper` and `tokio`.

/// Domain layer: request and response-head types.
pub mod domain;

/// Application layer: the Frontend dispatcher.
pub mod application;

/// Infrastructure layer: proxy listener, dispatcher runner, config file.
pub mod infrastructure;
