//! HTTP-over-Text loopback demo.
//!
//! Runs both halves in one process over an in-memory link that delays every
//! text by `--delay-ms` plus a random `0..--jitter-ms`, then serves a proxy.
//! Small chunks and long random delays mean nearly every response arrives
//! scrambled and has to be put back in order.
//!
//! ```text
//! hot-loopback [--listen 127.0.0.1:12345] [--chunk-size 64] [--delay-ms 2000] [--jitter-ms 2000]
//! curl -x http://127.0.0.1:12345 http://example.com/
//! ```

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hot_core::DispatchConfig;
use hot_loopback::{bind_loopback, LoopbackConfig};
use hot_transport::memory::Jitter;

/// HTTP-over-Text loopback demo.
#[derive(Debug, Parser)]
#[command(
    name = "hot-loopback",
    about = "Runs both tunnel halves in one process over a jittered in-memory link",
    version
)]
struct Cli {
    /// Address local clients use as their proxy.
    #[arg(long, default_value = "127.0.0.1:12345")]
    listen: String,

    /// Largest payload, in raw bytes, per data envelope.  `0` = unlimited.
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,

    /// Fixed delivery delay for every text, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    delay_ms: u64,

    /// Upper bound of the extra random delivery delay, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    jitter_ms: u64,

    /// Seconds without inbound envelopes before a connection is aborted.
    /// `0` disables idle collection.
    #[arg(long, default_value_t = 0)]
    idle_timeout: u64,

    /// Seconds allowed for dialling an upstream host.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

impl Cli {
    /// # Errors
    ///
    /// Returns an error if the listen address is not a socket address.
    fn into_parts(self) -> anyhow::Result<(SocketAddr, LoopbackConfig)> {
        let listen: SocketAddr = self
            .listen
            .parse()
            .with_context(|| format!("invalid proxy listen address '{}'", self.listen))?;
        let tunnel = DispatchConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_idle_timeout(Duration::from_secs(self.idle_timeout));
        let config = LoopbackConfig {
            tunnel,
            jitter: Jitter::new(
                Duration::from_millis(self.delay_ms),
                Duration::from_millis(self.jitter_ms),
            ),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        };
        Ok((listen, config))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` controls verbosity; default to `info`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (listen, config) = Cli::parse().into_parts()?;
    info!(
        "HTTP-over-Text loopback starting: chunk size {}, delay {:?} + up to {:?}",
        config.tunnel.chunk_size, config.jitter.fixed, config.jitter.random
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

    let (local, task) = bind_loopback(listen, config, running).await?;
    info!("proxy ready on {local}");
    task.await.context("loopback task panicked")??;

    info!("HTTP-over-Text loopback stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_scramble_heavily() {
        let (listen, config) = Cli::parse_from(["hot-loopback"]).into_parts().unwrap();
        assert_eq!(listen, "127.0.0.1:12345".parse::<SocketAddr>().unwrap());
        assert_eq!(config.tunnel.chunk_size, 64);
        assert_eq!(config.tunnel.idle_timeout, None);
        assert_eq!(config.jitter.fixed, Duration::from_millis(2000));
        assert_eq!(config.jitter.random, Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides_apply() {
        let (listen, config) = Cli::parse_from([
            "hot-loopback",
            "--listen",
            "127.0.0.1:0",
            "--chunk-size",
            "0",
            "--delay-ms",
            "0",
            "--jitter-ms",
            "5",
            "--idle-timeout",
            "30",
        ])
        .into_parts()
        .unwrap();
        assert_eq!(listen.port(), 0);
        assert_eq!(config.tunnel.chunk_size, 0);
        assert_eq!(config.jitter, Jitter::new(Duration::ZERO, Duration::from_millis(5)));
        assert_eq!(config.tunnel.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_bad_listen_address_is_an_error() {
        let result = Cli::parse_from(["hot-loopback", "--listen", "nowhere"]).into_parts();
        assert!(result.is_err());
    }
}
