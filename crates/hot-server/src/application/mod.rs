//! Application layer for hot-server.
//!
//! Holds the Backend dispatcher: it turns in-order outgoing frames into
//! upstream opens and pipe commands, and tracks each connection's lifecycle
//! from the reports upstream tasks send back.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or speaking HTTP (that is the [`Upstream`] implementation)
//! - Spawning tasks (the infrastructure runner owns the dispatcher task)

pub mod dispatch;

pub use dispatch::{
    Backend, BackendEvent, BackendPipe, Upstream, UpstreamEvent, UpstreamEvents, UpstreamLink,
};
