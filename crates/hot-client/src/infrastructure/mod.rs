//! Infrastructure layer for hot-client.
//!
//! # Responsibilities
//!
//! - Binding the local proxy listener and speaking HTTP/1 to local clients
//! - Upgrading `CONNECT` requests to raw tunnels
//! - Running the Frontend dispatcher task and feeding it transport texts
//! - Loading the TOML configuration file

pub mod config;
pub mod pipe;
pub mod proxy_listener;
pub mod runner;

pub use config::{load_config, ClientConfig, ProxyConfig};
pub use proxy_listener::{run_client, run_proxy};
pub use runner::{spawn_frontend, FrontendHandle};
