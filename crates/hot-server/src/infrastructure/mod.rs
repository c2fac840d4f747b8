//! Infrastructure layer for hot-server.
//!
//! # Responsibilities
//!
//! - Dialling real upstream hosts and replaying plain HTTP requests
//! - Running the Backend dispatcher task and feeding it transport texts
//! - Loading the TOML configuration file

pub mod config;
pub mod runner;
pub mod upstream;

pub use config::{load_config, ServerConfig, UpstreamConfig};
pub use runner::{run_server, spawn_backend};
pub use upstream::{TcpUpstream, UpstreamError};
