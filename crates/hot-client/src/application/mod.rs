//! Application layer for hot-client.
//!
//! Holds the Frontend dispatcher: it decides what happens to every local
//! connection and every inbound envelope, and delegates the actual byte I/O
//! to [`ClientPipe`] implementations and the transport.
//!
//! # What does NOT belong here?
//!
//! - Accepting sockets or speaking HTTP (that is infrastructure)
//! - Spawning tasks (the infrastructure runner owns the dispatcher task)

pub mod dispatch;

pub use dispatch::{ClientPipe, Frontend, FrontendEvent, PipeClosed};
