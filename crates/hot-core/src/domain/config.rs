//! Dispatcher tuning shared by both halves.
//!
//! None of these settings change the protocol, only how it is tuned for a
//! particular transport.  Messaging platforms cap message length
//! differently, so `chunk_size` is set per deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning parameters for a Frontend or Backend dispatcher.
///
/// # Example
///
/// ```toml
/// [tunnel]
/// chunk_size = 49000
/// idle_timeout_secs = 300
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Largest payload, in raw bytes, carried by one `data` envelope.
    /// `0` sends each read whole.
    #[serde(default)]
    pub chunk_size: usize,

    /// Records that see no inbound envelope for this long are torn down.
    /// Absent (the default) means a stalled record lives until its peer
    /// closes it.
    #[serde(
        default,
        rename = "idle_timeout_secs",
        with = "optional_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,
}

impl DispatchConfig {
    /// Builder-style setter for [`chunk_size`](Self::chunk_size).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Builder-style setter for [`idle_timeout`](Self::idle_timeout).
    /// A zero duration disables the timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// How often a dispatcher should sweep for idle records, or `None` when
    /// idle collection is off.  A quarter of the timeout, at least 100 ms.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.idle_timeout
            .map(|ttl| (ttl / 4).max(Duration::from_millis(MIN_SWEEP_INTERVAL_MS)))
    }
}

const MIN_SWEEP_INTERVAL_MS: u64 = 100;

/// `Option<Duration>` stored as whole seconds; `0` reads as `None`.
mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(d)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sends_reads_whole_and_never_expires() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.chunk_size, 0);
        assert_eq!(cfg.idle_timeout, None);
    }

    #[test]
    fn test_builder_zero_timeout_disables_gc() {
        let cfg = DispatchConfig::default()
            .with_chunk_size(64)
            .with_idle_timeout(Duration::ZERO);
        assert_eq!(cfg.chunk_size, 64);
        assert_eq!(cfg.idle_timeout, None);
    }

    #[test]
    fn test_builder_sets_idle_timeout() {
        let cfg = DispatchConfig::default().with_idle_timeout(Duration::from_secs(30));
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_sweep_interval_follows_idle_timeout() {
        assert_eq!(DispatchConfig::default().sweep_interval(), None);
        let cfg = DispatchConfig::default().with_idle_timeout(Duration::from_secs(60));
        assert_eq!(cfg.sweep_interval(), Some(Duration::from_secs(15)));
        let tiny = DispatchConfig::default().with_idle_timeout(Duration::from_millis(1));
        assert_eq!(tiny.sweep_interval(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_deserializes_seconds_from_json() {
        // Arrange
        let json = r#"{"chunk_size":49000,"idle_timeout_secs":300}"#;

        // Act
        let cfg: DispatchConfig = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(cfg.chunk_size, 49000);
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let cfg: DispatchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, DispatchConfig::default());
    }

    #[test]
    fn test_zero_seconds_reads_as_disabled() {
        let cfg: DispatchConfig = serde_json::from_str(r#"{"idle_timeout_secs":0}"#).unwrap();
        assert_eq!(cfg.idle_timeout, None);
    }
}
