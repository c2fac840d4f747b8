//! TOML configuration for the `hot-server` binary.
//!
//! Read from `--config <path>` or, if absent, `~/.http-over-text/server.toml`
//! when that file exists.  With no file at all the server half waits for the
//! proxy half to dial in on `127.0.0.1:24900`.
//!
//! ```toml
//! [tunnel]
//! chunk_size = 49000
//! idle_timeout_secs = 300
//!
//! [upstream]
//! connect_timeout_secs = 10
//!
//! [transport]
//! mode = "listen"
//! address = "0.0.0.0:24900"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hot_core::DispatchConfig;
use hot_transport::{load_or_default, ConfigError, PeerMode, TransportConfig};

/// File name looked up in the per-user config directory.
pub const CONFIG_FILE_NAME: &str = "server.toml";

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub tunnel: DispatchConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default = "default_transport")]
    pub transport: TransportConfig,
}

/// The server half listens by default; the proxy half dials it.
fn default_transport() -> TransportConfig {
    TransportConfig {
        mode: PeerMode::Listen,
        ..TransportConfig::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tunnel: DispatchConfig::default(),
            upstream: UpstreamConfig::default(),
            transport: default_transport(),
        }
    }
}

/// Settings for real upstream connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Seconds allowed for dialling an upstream host.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Loads the server configuration.
///
/// # Errors
///
/// Returns [`ConfigError`] if an explicit path cannot be read, or if any
/// file read is not valid server TOML.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    load_or_default(path, CONFIG_FILE_NAME)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listens_for_the_proxy_half() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.transport.mode, PeerMode::Listen);
        assert_eq!(cfg.transport.address, "127.0.0.1:24900");
        assert_eq!(cfg.upstream.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_file_is_the_default() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_full_file_parses() {
        // Arrange
        let text = r#"
            [tunnel]
            chunk_size = 1000
            idle_timeout_secs = 60

            [upstream]
            connect_timeout_secs = 3

            [transport]
            mode = "connect"
            address = "198.51.100.2:24900"
        "#;

        // Act
        let cfg: ServerConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.tunnel.chunk_size, 1000);
        assert_eq!(cfg.tunnel.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.upstream.connect_timeout_secs, 3);
        assert_eq!(cfg.transport.mode, PeerMode::Connect);
        assert_eq!(cfg.transport.address, "198.51.100.2:24900");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/hot/server.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
