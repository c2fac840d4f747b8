//! Spawns the Backend dispatcher and its feeders, and runs the server half.
//!
//! One event channel feeds the dispatcher task from three sources:
//!
//! - a forwarder moving every inbound transport text in as
//!   [`BackendEvent::Inbound`];
//! - a ticker sending [`BackendEvent::Sweep`] when idle collection is on;
//! - upstream connection tasks reporting lifecycle changes.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use hot_core::DispatchConfig;
use hot_transport::{open_link, Link};

use crate::application::{Backend, BackendEvent, Upstream};
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::upstream::TcpUpstream;

/// How often [`run_server`] checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Starts a Backend over `link` and returns the dispatcher task.
///
/// Must be called inside a tokio runtime.  The dispatcher runs until the
/// returned handle is aborted.
pub fn spawn_backend<U: Upstream + 'static>(
    link: Link,
    config: DispatchConfig,
    upstream: U,
) -> JoinHandle<()> {
    let Link {
        transport,
        mut inbound,
    } = link;
    let (events, rx) = mpsc::unbounded_channel();

    let backend = Backend::new(transport, config, upstream, events.clone());
    let dispatcher = tokio::spawn(backend.run(rx));

    let forward = events.clone();
    tokio::spawn(async move {
        while let Some(text) = inbound.recv().await {
            if forward.send(BackendEvent::Inbound(text)).is_err() {
                break;
            }
        }
        debug!("transport inbound closed");
    });

    if let Some(period) = config.sweep_interval() {
        tokio::spawn(tick_sweeps(period, events));
    }

    dispatcher
}

async fn tick_sweeps(period: Duration, events: mpsc::UnboundedSender<BackendEvent>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if events.send(BackendEvent::Sweep).is_err() {
            break;
        }
    }
}

/// Opens the transport, starts the Backend and keeps it running until
/// `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the transport cannot be opened.
pub async fn run_server(config: ServerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let link = open_link(&config.transport)
        .await
        .context("failed to open transport")?;
    let upstream = TcpUpstream::new(config.upstream.connect_timeout());
    let dispatcher = spawn_backend(link, config.tunnel, upstream);
    info!("server half ready");

    while running.load(Ordering::Relaxed) {
        if dispatcher.is_finished() {
            warn!("backend dispatcher stopped unexpectedly");
            return Ok(());
        }
        sleep(SHUTDOWN_POLL).await;
    }

    info!("shutdown flag set; stopping dispatcher");
    dispatcher.abort();
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
