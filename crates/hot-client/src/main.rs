//! HTTP-over-Text proxy half: entry point.
//!
//! Runs a local HTTP/HTTPS proxy.  Every request or `CONNECT` tunnel a local
//! client makes through it is carried as text envelopes over the configured
//! transport to a `hot-server` process, which makes the real upstream
//! connection.
//!
//! # Usage
//!
//! ```text
//! hot-client [OPTIONS]
//!
//! Options:
//!   --config       <PATH>     TOML config file [default: ~/.http-over-text/client.toml]
//!   --listen       <ADDR>     Proxy listen address [default: 127.0.0.1:12345]
//!   --peer-mode    <MODE>     connect | listen [default: connect]
//!   --peer-addr    <ADDR>     Transport address to dial or bind [default: 127.0.0.1:24900]
//!   --chunk-size   <BYTES>    Max payload bytes per data envelope, 0 = unlimited
//!   --idle-timeout <SECS>     Abort connections idle this long, 0 = never
//! ```
//!
//! Command-line values override the config file.  Every option can also be
//! set through the environment variable named in `--help`.
//!
//! Point a browser at the proxy, or try it with curl:
//!
//! ```text
//! curl -x http://127.0.0.1:12345 http://example.com/
//! curl -x http://127.0.0.1:12345 https://example.com/
//! ```

use std::net::SocketAddr;
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

use hot_client::infrastructure::{load_config, run_client, ClientConfig};
use hot_transport::PeerMode;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HTTP-over-Text local proxy.
#[derive(Debug, Parser)]
#[command(
    name = "hot-client",
    about = "Local HTTP/HTTPS proxy that tunnels traffic over a text transport",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "HOT_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Address local clients use as their proxy.
    #[arg(long, env = "HOT_LISTEN")]
    listen: Option<String>,

    /// Whether to dial the server half or wait for it to dial in.
    #[arg(long, env = "HOT_PEER_MODE")]
    peer_mode: Option<PeerMode>,

    /// Transport address to dial (connect mode) or bind (listen mode).
    #[arg(long, env = "HOT_PEER_ADDR")]
    peer_addr: Option<String>,

    /// Largest payload, in raw bytes, per data envelope.  `0` = unlimited.
    #[arg(long, env = "HOT_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Seconds without inbound envelopes before a connection is aborted.
    /// `0` disables idle collection.
    #[arg(long, env = "HOT_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,
}

impl Cli {
    /// Overlays the command-line values on `config`.
    fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(listen) = &self.listen {
            config.proxy.listen = listen.clone();
        }
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
    }

    /// Loads the config file and applies the command line on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the resulting
    /// proxy listen address is not a socket address.
    fn into_client_config(self) -> anyhow::Result<ClientConfig> {
        let mut config =
            load_config(self.config.as_deref()).context("failed to load client configuration")?;
        self.apply_to(&mut config);

        config
            .proxy
            .listen
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid proxy listen address '{}'", config.proxy.listen))?;
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

    let config = Cli::parse().into_client_config()?;

    info!(
        "HTTP-over-Text proxy starting: proxy={}, transport={:?} {}",
        config.proxy.listen, config.transport.mode, config.transport.address
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

    run_client(config, running).await?;

    info!("HTTP-over-Text proxy stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
