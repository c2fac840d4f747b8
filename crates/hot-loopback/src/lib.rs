//! hot-loopback library crate.
//!
//! Runs the proxy half and the connector half of HTTP-over-Text inside one
//! process, joined by an in-memory link that delays every text by a random
//! amount.  Nothing leaves the machine except the real upstream connections,
//! so this is the quickest way to watch the envelope protocol survive
//! reordering.
//!
//! ```text
//! curl ──► proxy listener ─► Frontend ═══ MemoryLink (jitter) ═══ Backend ─► upstream
//! ```

use std::net::SocketAddr;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use hot_client::infrastructure::{run_proxy, spawn_frontend};
use hot_core::DispatchConfig;
use hot_server::infrastructure::{spawn_backend, TcpUpstream};
use hot_transport::memory::{Jitter, MemoryLink};

/// Settings for one loopback pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Shared by both halves.
    pub tunnel: DispatchConfig,
    /// Delivery delay applied to every text, in both directions.
    pub jitter: Jitter,
    /// Upper bound on dialling an upstream host.
    pub connect_timeout: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            tunnel: DispatchConfig::default(),
            jitter: Jitter::none(),
            connect_timeout: hot_server::infrastructure::upstream::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Serves proxy clients on `listener` through a Frontend/Backend pair until
/// `running` is cleared.
///
/// Must be called inside a tokio runtime.  The returned task resolves with
/// the proxy loop's result once it stops; the Backend is torn down with it.
pub fn spawn_loopback(
    listener: TcpListener,
    config: LoopbackConfig,
    running: Arc<AtomicBool>,
) -> JoinHandle<anyhow::Result<()>> {
    let (client_link, server_link) = MemoryLink::pair(config.jitter);
    let backend = spawn_backend(
        server_link,
        config.tunnel,
        TcpUpstream::new(config.connect_timeout),
    );
    let frontend = spawn_frontend(client_link, config.tunnel);

    tokio::spawn(async move {
        let result = run_proxy(listener, frontend, running).await;
        backend.abort();
        info!("loopback stopped");
        result
    })
}

/// Binds `addr` and starts a loopback on it, returning the bound address.
///
/// # Errors
///
/// Returns an error if `addr` cannot be bound.
pub async fn bind_loopback(
    addr: SocketAddr,
    config: LoopbackConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<(SocketAddr, JoinHandle<anyhow::Result<()>>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind proxy listener on {addr}"))?;
    let local = listener
        .local_addr()
        .context("proxy listener has no local address")?;
    Ok((local, spawn_loopback(listener, config, running)))
}
