//! HTTP-over-Text connector half: entry point.
//!
//! Waits for text envelopes from a `hot-client` process, makes the real
//! upstream TCP connection or HTTP request each connection asks for, and
//! sends the answers back as envelopes.
//!
//! # Usage
//!
//! ```text
//! hot-server [OPTIONS]
//!
//! Options:
//!   --config          <PATH>   TOML config file [default: ~/.http-over-text/server.toml]
//!   --peer-mode       <MODE>   connect | listen [default: listen]
//!   --peer-addr       <ADDR>   Transport address to dial or bind [default: 127.0.0.1:24900]
//!   --chunk-size      <BYTES>  Max payload bytes per data envelope, 0 = unlimited
//!   --idle-timeout    <SECS>   Abort connections idle this long, 0 = never
//!   --connect-timeout <SECS>   Upper bound on dialling an upstream host [default: 10]
//! ```
//!
//! Command-line values override the config file.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hot_server::infrastructure::{load_config, run_server, ServerConfig};
use hot_transport::PeerMode;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HTTP-over-Text upstream connector.
#[derive(Debug, Parser)]
#[command(
    name = "hot-server",
    about = "Opens the real upstream connections for an HTTP-over-Text proxy",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "HOT_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Whether to wait for the proxy half to dial in or dial it.
    #[arg(long, env = "HOT_PEER_MODE")]
    peer_mode: Option<PeerMode>,

    /// Transport address to bind (listen mode) or dial (connect mode).
    #[arg(long, env = "HOT_PEER_ADDR")]
    peer_addr: Option<String>,

    /// Largest payload, in raw bytes, per data envelope.  `0` = unlimited.
    #[arg(long, env = "HOT_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Seconds without inbound envelopes before a connection is aborted.
    /// `0` disables idle collection.
    #[arg(long, env = "HOT_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Seconds allowed for dialling an upstream host.
    #[arg(long, env = "HOT_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,
}

impl Cli {
    fn apply_to(&self, config: &mut ServerConfig) {
        if let Some(mode) = self.peer_mode {
            config.transport.mode = mode;
        }
        if let Some(addr) = &self.peer_addr {
            config.transport.address = addr.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.tunnel = config.tunnel.with_chunk_size(chunk_size);
        }
        if let Some(secs) = self.idle_timeout {
            config.tunnel = config.tunnel.with_idle_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout {
            config.upstream.connect_timeout_secs = secs;
        }
    }

    /// Loads the config file and applies the command line on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the connect
    /// timeout is zero.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config =
            load_config(self.config.as_deref()).context("failed to load server configuration")?;
        self.apply_to(&mut config);

        if config.upstream.connect_timeout_secs == 0 {
            anyhow::bail!("upstream connect timeout must be at least one second");
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` controls verbosity; default to `info`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;

    info!(
        "HTTP-over-Text connector starting: transport={:?} {}, connect timeout {}s",
        config.transport.mode, config.transport.address, config.upstream.connect_timeout_secs
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(config, running).await?;

    info!("HTTP-over-Text connector stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(args: &[&str]) -> ServerConfig {
        let cli = Cli::parse_from(args.iter().copied());
        let mut config = ServerConfig::default();
        cli.apply_to(&mut config);
        config
    }

    #[test]
    fn test_cli_without_arguments_leaves_config_untouched() {
        assert_eq!(configured(&["hot-server"]), ServerConfig::default());
    }

    #[test]
    fn test_cli_peer_overrides() {
        let config = configured(&[
            "hot-server",
            "--peer-mode",
            "connect",
            "--peer-addr",
            "203.0.113.7:24900",
        ]);
        assert_eq!(config.transport.mode, PeerMode::Connect);
        assert_eq!(config.transport.address, "203.0.113.7:24900");
    }

    #[test]
    fn test_cli_tunnel_and_upstream_overrides() {
        let config = configured(&[
            "hot-server",
            "--chunk-size",
            "1024",
            "--idle-timeout",
            "30",
            "--connect-timeout",
            "4",
        ]);
        assert_eq!(config.tunnel.chunk_size, 1024);
        assert_eq!(config.tunnel.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.upstream.connect_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_into_server_config_rejects_zero_connect_timeout() {
        let path = std::env::temp_dir().join(format!("hot-server-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "").unwrap();
        let cli = Cli::parse_from([
            "hot-server",
            "--config",
            path.to_str().unwrap(),
            "--connect-timeout",
            "0",
        ]);

        let result = cli.into_server_config();
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_reads_file_then_applies_cli() {
        // Arrange
        let path =
            std::env::temp_dir().join(format!("hot-server-file-{}.toml", std::process::id()));
        std::fs::write(&path, "[upstream]\nconnect_timeout_secs = 7\n[tunnel]\nchunk_size = 5\n")
            .unwrap();
        let cli = Cli::parse_from([
            "hot-server",
            "--config",
            path.to_str().unwrap(),
            "--chunk-size",
            "9",
        ]);

        // Act
        let config = cli.into_server_config().unwrap();
        std::fs::remove_file(&path).unwrap();

        // Assert
        assert_eq!(config.upstream.connect_timeout_secs, 7);
        assert_eq!(config.tunnel.chunk_size, 9);
        assert_eq!(config.transport.mode, PeerMode::Listen);
    }
}
