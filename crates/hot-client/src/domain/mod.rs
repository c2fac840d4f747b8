//! Domain layer for hot-client.
//!
//! Pure types describing what a local proxy client asked for and what the
//! remote half answered.  Nothing here touches sockets or async runtimes.

pub mod request;

pub use request::{LocalRequest, ResponseHead};
