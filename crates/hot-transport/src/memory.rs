//! In-process transport pair with random delivery delay.
//!
//! Each text sent on one side is delivered to the other side after
//! `fixed + uniform(0..random)`, on its own timer.  Two messages sent close
//! together therefore often arrive swapped, which is exactly the behaviour
//! of a real chat transport that the reorder buffer has to absorb.
//!
//! With [`Jitter::none`] delivery is immediate and in order.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{Link, Transport, TransportError};

/// Delivery delay applied to each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Jitter {
    /// Delay every message gets.
    pub fixed: Duration,
    /// Upper bound of the extra uniformly random delay.
    pub random: Duration,
}

impl Jitter {
    /// No delay: texts arrive immediately and in send order.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(fixed: Duration, random: Duration) -> Self {
        Self { fixed, random }
    }

    fn is_zero(&self) -> bool {
        self.fixed.is_zero() && self.random.is_zero()
    }

    fn sample(&self) -> Duration {
        let range = self.random.as_micros() as u64;
        if range == 0 {
            return self.fixed;
        }
        self.fixed + Duration::from_micros(rand::thread_rng().gen_range(0..range))
    }
}

/// Outbound half of one side of a [`MemoryLink`] pair.
pub struct MemoryTransport {
    peer: mpsc::UnboundedSender<String>,
    jitter: Jitter,
}

impl Transport for MemoryTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.peer.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.jitter.is_zero() {
            return self.peer.send(text).map_err(|_| TransportError::Closed);
        }

        let runtime = Handle::try_current()
            .map_err(|_| TransportError::Rejected("no async runtime for delayed delivery".into()))?;
        let delay = self.jitter.sample();
        let peer = self.peer.clone();
        trace!(delay_ms = delay.as_millis() as u64, "scheduling delivery");
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // The peer may have shut down while we slept.
            let _ = peer.send(text);
        });
        Ok(())
    }
}

/// Factory for cross-wired in-memory links.
pub struct MemoryLink;

impl MemoryLink {
    /// Creates two links; what one side sends, the other receives.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hot_transport::memory::{Jitter, MemoryLink};
    ///
    /// let (a, mut b) = MemoryLink::pair(Jitter::none());
    /// a.transport.send("hello".to_string()).unwrap();
    /// assert_eq!(b.inbound.try_recv().unwrap(), "hello");
    /// ```
    pub fn pair(jitter: Jitter) -> (Link, Link) {
        let (to_a, inbound_a) = mpsc::unbounded_channel();
        let (to_b, inbound_b) = mpsc::unbounded_channel();
        let a = Link {
            transport: Arc::new(MemoryTransport { peer: to_b, jitter }),
            inbound: inbound_a,
        };
        let b = Link {
            transport: Arc::new(MemoryTransport { peer: to_a, jitter }),
            inbound: inbound_b,
        };
        (a, b)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_zero_jitter_delivers_in_order_without_runtime() {
        // Arrange
        let (a, mut b) = MemoryLink::pair(Jitter::none());

        // Act
        for i in 0..5 {
            assert_ok!(a.transport.send(format!("m{i}")));
        }

        // Assert
        for i in 0..5 {
            assert_eq!(b.inbound.try_recv().unwrap(), format!("m{i}"));
        }
    }

    #[test]
    fn test_links_are_cross_wired_both_ways() {
        let (mut a, mut b) = MemoryLink::pair(Jitter::none());
        assert_ok!(a.transport.send("to b".into()));
        assert_ok!(b.transport.send("to a".into()));
        assert_eq!(b.inbound.try_recv().unwrap(), "to b");
        assert_eq!(a.inbound.try_recv().unwrap(), "to a");
    }

    #[test]
    fn test_send_after_peer_dropped_reports_closed() {
        let (a, b) = MemoryLink::pair(Jitter::none());
        drop(b);
        assert_eq!(a.transport.send("lost".into()), Err(TransportError::Closed));
    }

    #[test]
    fn test_delayed_send_outside_runtime_is_rejected() {
        let (a, _b) = MemoryLink::pair(Jitter::new(Duration::from_millis(1), Duration::ZERO));
        assert_err!(a.transport.send("x".into()));
    }

    #[test]
    fn test_sample_stays_within_bounds() {
        let jitter = Jitter::new(Duration::from_millis(10), Duration::from_millis(5));
        for _ in 0..100 {
            let d = jitter.sample();
            assert!(d >= Duration::from_millis(10) && d < Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn test_jittered_delivery_eventually_delivers_everything() {
        // Arrange
        let (a, mut b) = MemoryLink::pair(Jitter::new(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ));

        // Act
        for i in 0..20 {
            a.transport.send(i.to_string()).unwrap();
        }
        let mut got = Vec::new();
        for _ in 0..20 {
            got.push(b.inbound.recv().await.unwrap().parse::<u32>().unwrap());
        }

        // Assert: every message arrives exactly once, whatever the order
        got.sort_unstable();
        assert_eq!(got, (0..20).collect::<Vec<_>>());
    }
}
