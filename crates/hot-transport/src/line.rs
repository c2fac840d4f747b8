//! Newline-delimited text transport over a single TCP connection.
//!
//! The JSON envelope codec never emits a raw newline, so one envelope per
//! line is an unambiguous framing.  One side [`listen`]s, the other
//! [`connect`]s; either side may restart without the other noticing more than
//! a gap in delivery.
//!
//! # Mutual exclusion
//!
//! Many connections share one [`LineTransport`].  `send` only pushes onto a
//! channel; a single writer (the session loop below) owns the socket, so
//! lines are never interleaved.  Texts sent while no peer is connected wait
//! in that channel and go out once a session starts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{Link, Transport, TransportError};

// ── Reconnection constants ────────────────────────────────────────────────────

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 60000;
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Exponential reconnect delay for [`connect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(INITIAL_BACKOFF_MS),
            max: Duration::from_millis(MAX_BACKOFF_MS),
            multiplier: BACKOFF_MULTIPLIER,
        }
    }
}

impl Backoff {
    /// Delay to use after `current`, capped at `max`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max)
    }
}

/// Outbound half of a line link.
pub struct LineTransport {
    outbound: mpsc::UnboundedSender<String>,
}

impl Transport for LineTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }
}

/// Why a session loop returned.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The peer hung up or the socket failed; try again.
    PeerGone,
    /// Our own side shut down (all senders or the inbound receiver dropped).
    Shutdown,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Connects to `addr`, reconnecting with `backoff` whenever the link drops.
///
/// Returns immediately; the connection is made by a background task that
/// lives until the returned [`Link`] is dropped.
pub fn connect(addr: String, backoff: Backoff) -> Link {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut delay = backoff.initial;
        let mut first_connect = true;

        loop {
            if !first_connect {
                info!("reconnecting to {addr} in {} ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
            first_connect = false;

            match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => {
                    info!("line transport connected to {addr}");
                    delay = backoff.initial;
                    if run_session(stream, &mut outbound_rx, &inbound_tx).await
                        == SessionEnd::Shutdown
                    {
                        break;
                    }
                    warn!("line transport to {addr} dropped");
                }
                Err(e) => {
                    error!("line transport connect to {addr} failed: {e}");
                    delay = backoff.next_delay(delay);
                }
            }
            if inbound_tx.is_closed() {
                break;
            }
        }
        debug!("line transport to {addr} stopped");
    });

    Link {
        transport: Arc::new(LineTransport {
            outbound: outbound_tx,
        }),
        inbound: inbound_rx,
    }
}

/// Binds `addr` and serves one peer at a time, re-accepting after each
/// disconnect.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn listen(addr: SocketAddr) -> anyhow::Result<(Link, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind line transport on {addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("line transport listener has no local address")?;
    info!("line transport listening on {local_addr}");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = inbound_tx.closed() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    info!("line transport peer connected from {peer}");
                    if run_session(stream, &mut outbound_rx, &inbound_tx).await
                        == SessionEnd::Shutdown
                    {
                        break;
                    }
                    warn!("line transport peer {peer} disconnected");
                }
                Err(e) => error!("line transport accept error: {e}"),
            }
        }
        debug!("line transport listener on {local_addr} stopped");
    });

    Ok((
        Link {
            transport: Arc::new(LineTransport {
                outbound: outbound_tx,
            }),
            inbound: inbound_rx,
        },
        local_addr,
    ))
}

// ── Session loop ──────────────────────────────────────────────────────────────

/// Pumps lines both ways over `stream` until either side goes away.
async fn run_session(
    stream: TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    inbound: &mpsc::UnboundedSender<String>,
) -> SessionEnd {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => {
                    if inbound.send(line).is_err() {
                        return SessionEnd::Shutdown;
                    }
                }
                Ok(None) => return SessionEnd::PeerGone,
                Err(e) => {
                    warn!("line transport read error: {e}");
                    return SessionEnd::PeerGone;
                }
            },
            text = outbound.recv() => match text {
                Some(mut text) => {
                    text.push('\n');
                    if let Err(e) = write_half.write_all(text.as_bytes()).await {
                        warn!("line transport write error, message lost: {e}");
                        return SessionEnd::PeerGone;
                    }
                }
                None => return SessionEnd::Shutdown,
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn test_backoff_doubles_and_caps() {
        // Arrange
        let backoff = Backoff::default();

        // Act / Assert
        let second = backoff.next_delay(backoff.initial);
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(backoff.next_delay(Duration::from_secs(45)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_listen_and_connect_exchange_lines_both_ways() {
        // Arrange
        let (server, addr) = listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut server = server;
        let mut client = connect(addr.to_string(), Backoff::default());

        // Act
        client.transport.send("hello server".into()).unwrap();
        server.transport.send("hello client".into()).unwrap();

        // Assert
        let got = timeout(Duration::from_secs(5), server.inbound.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("hello server"));
        let got = timeout(Duration::from_secs(5), client.inbound.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("hello client"));
    }

    #[tokio::test]
    async fn test_many_sends_arrive_as_separate_lines() {
        let (mut server, addr) = listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let client = connect(addr.to_string(), Backoff::default());

        for i in 0..50 {
            client.transport.send(format!("{{\"n\":{i}}}")).unwrap();
        }

        for i in 0..50 {
            let got = timeout(Duration::from_secs(5), server.inbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, format!("{{\"n\":{i}}}"));
        }
    }
}
