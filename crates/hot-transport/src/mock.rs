//! Recording transport for tests.
//!
//! Implements [`Transport`] by storing every sent text, so dispatcher tests
//! can assert on exactly which envelopes went out and feed them to the other
//! half in any order they like.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hot_core::protocol::{decode_envelope, Envelope, Frame};

use crate::{Transport, TransportError};

/// A [`Transport`] that records sent texts instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later `send` fail with [`TransportError::Closed`]
    /// (`true`) or succeed again (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of every text sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    /// Removes and returns every text sent so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock().expect("lock poisoned"))
    }

    /// Every recorded text that decodes as an envelope of frame type `F`.
    pub fn envelopes<F: Frame>(&self) -> Vec<Envelope<F>> {
        self.sent()
            .iter()
            .filter_map(|text| decode_envelope::<F>(text).ok())
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().expect("lock poisoned").push(text);
        Ok(())
    }
}
