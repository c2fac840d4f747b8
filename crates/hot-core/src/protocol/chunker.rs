//! Splits byte buffers into size-bounded chunks.
//!
//! Every messaging platform has a per-message length budget, so a large read
//! from a socket may need several `data` envelopes.  The chunker slices the
//! buffer without copying: each chunk is a [`Bytes`] view into the original
//! allocation.

use bytes::Bytes;

/// Splits `data` into consecutive chunks of at most `max` bytes.
///
/// - `max == 0` disables subdivision: a non-empty buffer is returned whole.
/// - An empty buffer yields no chunks.
/// - Concatenating the result reproduces `data` exactly, and the chunk count
///   is `ceil(data.len() / max)`.
///
/// # Examples
///
/// ```rust
/// use bytes::Bytes;
/// use hot_core::protocol::chunk;
///
/// let parts = chunk(&Bytes::from_static(b"abcdefg"), 3);
/// assert_eq!(parts, vec!["abc", "def", "g"]);
/// ```
pub fn chunk(data: &Bytes, max: usize) -> Vec<Bytes> {
    if data.is_empty() {
        return Vec::new();
    }
    if max == 0 {
        return vec![data.clone()];
    }

    let mut chunks = Vec::with_capacity(data.len().div_ceil(max));
    let mut start = 0;
    while start < data.len() {
        let end = usize::min(start + max, data.len());
        chunks.push(data.slice(start..end));
        start = end;
    }
    chunks
}

// ── Tests ─────────────────────────────────────────────────────────────────────
