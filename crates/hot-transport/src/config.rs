//! Transport settings as they appear in the binaries' TOML files, plus the
//! file loader both binaries share.
//!
//! ```toml
//! [transport]
//! mode = "connect"          # or "listen"
//! address = "203.0.113.7:24900"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = ...)]`, so an empty or partial file
//! is valid and a missing file is simply the defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::line::{self, Backoff};
use crate::Link;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Directory holding the per-user config files: `~/.http-over-text`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".http-over-text"))
}

/// Reads and parses a TOML config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it is not valid TOML for `T`.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

/// Loads `explicit` if given, else `file_name` from [`config_dir`] if that
/// file exists, else `T::default()`.
///
/// # Errors
///
/// An explicit path that cannot be read is an error; a missing default file
/// is not.
pub fn load_or_default<T: DeserializeOwned + Default>(
    explicit: Option<&Path>,
    file_name: &str,
) -> Result<T, ConfigError> {
    if let Some(path) = explicit {
        return load_toml(path);
    }
    match config_dir().map(|dir| dir.join(file_name)) {
        Some(path) if path.is_file() => load_toml(&path),
        _ => Ok(T::default()),
    }
}

/// Which end of the TCP line link this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    /// Dial the peer, reconnecting with backoff.
    Connect,
    /// Wait for the peer to dial in.
    Listen,
}

impl std::str::FromStr for PeerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "connect" => Ok(PeerMode::Connect),
            "listen" => Ok(PeerMode::Listen),
            other => Err(format!("unknown peer mode '{other}' (expected connect or listen)")),
        }
    }
}

/// How to reach the remote half of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_mode")]
    pub mode: PeerMode,
    /// `host:port` to dial, or the local address to bind.
    #[serde(default = "default_address")]
    pub address: String,
}

fn default_mode() -> PeerMode {
    PeerMode::Connect
}
fn default_address() -> String {
    "127.0.0.1:24900".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            address: default_address(),
        }
    }
}

/// Opens the line link described by `config`.
///
/// # Errors
///
/// Returns an error if a listen address does not parse or cannot be bound.
pub async fn open_link(config: &TransportConfig) -> anyhow::Result<Link> {
    match config.mode {
        PeerMode::Connect => Ok(line::connect(config.address.clone(), Backoff::default())),
        PeerMode::Listen => {
            let addr: SocketAddr = config
                .address
                .parse()
                .with_context(|| format!("invalid listen address '{}'", config.address))?;
            let (link, _) = line::listen(addr).await?;
            Ok(link)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
