//! Spawns the Frontend dispatcher and its feeders.
//!
//! Three kinds of task feed one dispatcher task through a single event
//! channel:
//!
//! - a forwarder moving every inbound transport text in as
//!   [`FrontendEvent::Inbound`];
//! - a ticker sending [`FrontendEvent::Sweep`] when idle collection is on;
//! - the proxy listener's per-connection tasks, via [`FrontendHandle`].

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use hot_core::protocol::{ConnectionId, OutgoingFrame};
use hot_core::{DispatchConfig, Emitter};
use hot_transport::Link;

use crate::application::{ClientPipe, Frontend, FrontendEvent};
use crate::domain::LocalRequest;

/// Cloneable handle to a running Frontend dispatcher.
#[derive(Clone)]
pub struct FrontendHandle {
    events: mpsc::UnboundedSender<FrontendEvent>,
}

impl FrontendHandle {
    /// Wraps an existing event sender, for driving a dispatcher by hand.
    pub fn from_sender(events: mpsc::UnboundedSender<FrontendEvent>) -> Self {
        Self { events }
    }

    /// Registers a local connection and waits for its emitter.
    ///
    /// Returns `None` if the dispatcher has stopped.
    pub async fn open(
        &self,
        request: LocalRequest,
        pipe: Box<dyn ClientPipe>,
    ) -> Option<Emitter<OutgoingFrame>> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(FrontendEvent::Open {
                request,
                pipe,
                reply,
            })
            .ok()?;
        rx.await.ok()
    }

    /// Reports that the local side of `id` broke.
    pub fn local_failed(&self, id: ConnectionId) {
        let _ = self.events.send(FrontendEvent::LocalFailed(id));
    }
}

/// Starts a Frontend over `link`.  Must be called inside a tokio runtime.
pub fn spawn_frontend(link: Link, config: DispatchConfig) -> FrontendHandle {
    let Link {
        transport,
        mut inbound,
    } = link;
    let (events, rx) = mpsc::unbounded_channel();

    tokio::spawn(Frontend::new(transport, config).run(rx));

    let forward = events.clone();
    tokio::spawn(async move {
        while let Some(text) = inbound.recv().await {
            if forward.send(FrontendEvent::Inbound(text)).is_err() {
                break;
            }
        }
        debug!("transport inbound closed");
    });

    if let Some(period) = config.sweep_interval() {
        tokio::spawn(tick_sweeps(period, events.clone()));
    }

    FrontendHandle { events }
}

async fn tick_sweeps(period: Duration, events: mpsc::UnboundedSender<FrontendEvent>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if events.send(FrontendEvent::Sweep).is_err() {
            break;
        }
    }
}
