//! Domain layer for hot-server.
//!
//! What the remote proxy half asked for, and what the dispatcher tells a
//! running upstream connection to do next.

pub mod upstream;

pub use upstream::{PipeCommand, UpstreamRequest};
