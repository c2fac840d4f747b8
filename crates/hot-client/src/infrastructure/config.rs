//! TOML configuration for the `hot-client` binary.
//!
//! Read from `--config <path>` or, if absent, `~/.http-over-text/client.toml`
//! when that file exists.  Every field has a default, so no file at all is a
//! working setup: proxy on `127.0.0.1:12345`, dialling a server half on
//! `127.0.0.1:24900`.
//!
//! ```toml
//! [proxy]
//! listen = "127.0.0.1:12345"
//!
//! [tunnel]
//! chunk_size = 49000
//! idle_timeout_secs = 300
//!
//! [transport]
//! mode = "connect"
//! address = "203.0.113.7:24900"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use hot_core::DispatchConfig;
use hot_transport::{load_or_default, ConfigError, TransportConfig};

/// File name looked up in the per-user config directory.
pub const CONFIG_FILE_NAME: &str = "client.toml";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub tunnel: DispatchConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Local proxy listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address local clients use as their HTTP/HTTPS proxy.
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:12345".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Loads the client configuration.
///
/// # Errors
///
/// Returns [`ConfigError`] if an explicit path cannot be read, or if any
/// file read is not valid client TOML.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    load_or_default(path, CONFIG_FILE_NAME)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
