//! Binary-to-text codec for envelope payloads.
//!
//! Chat transports only carry printable text, so every byte payload is
//! encoded with the standard padded base64 alphabet before it is placed in an
//! envelope.  The alphabet contains no characters that JSON needs to escape,
//! which keeps encoded envelopes compact.
//!
//! # Wire compatibility
//!
//! Base64 costs 4 characters per 3 bytes (about 33% overhead).  Peers that
//! encode payloads with padded Z85 (5 characters per 4 bytes, 25%) cannot
//! decode these envelopes and vice versa: both halves of a tunnel must run
//! this codec.  When sizing `chunk_size` against a transport's message
//! limit, budget `4 * ceil(chunk_size / 3)` payload characters per envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::protocol::codec::ProtocolError;

/// Encodes `bytes` as printable text.
///
/// The empty buffer encodes to the empty string.
///
/// # Examples
///
/// ```rust
/// use hot_core::protocol::{decode_text, encode_bytes};
///
/// let text = encode_bytes(b"GET / HTTP/1.1\r\n");
/// assert_eq!(decode_text(&text).unwrap(), b"GET / HTTP/1.1\r\n");
/// ```
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes text produced by [`encode_bytes`] back into bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::BadPayload`] if `text` is not valid padded base64.
pub fn decode_text(text: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(STANDARD.decode(text)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_byte_value() {
        // Arrange
        let all: Vec<u8> = (0..=255u8).collect();

        // Act
        let text = encode_bytes(&all);
        let decoded = decode_text(&text).unwrap();

        // Assert
        assert_eq!(decoded, all);
    }

    #[test]
    fn test_empty_buffer_round_trips_through_empty_string() {
        let text = encode_bytes(&[]);
        assert_eq!(text, "");
        assert!(decode_text(&text).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_lengths_around_padding_boundaries() {
        // Base64 pads to multiples of three input bytes; cover each remainder.
        for len in 1..=7usize {
            let data: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            assert_eq!(decode_text(&encode_bytes(&data)).unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn test_encoded_length_is_four_chars_per_three_bytes() {
        for len in [1usize, 3, 4, 64, 100] {
            let text = encode_bytes(&vec![0xAB; len]);
            assert_eq!(text.len(), 4 * len.div_ceil(3), "len {len}");
        }
    }

    #[test]
    fn test_z85_text_is_not_accepted() {
        // "HelloWorld" is the Z85 encoding of 86 4F D2 6F B5 59 7E 5B
        assert!(decode_text("HelloWorld").is_err());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(encode_bytes(b"hello"), encode_bytes(b"hello"));
        assert_eq!(encode_bytes(b"hello"), "aGVsbG8=");
    }

    #[test]
    fn test_encoded_text_is_printable_ascii() {
        let all: Vec<u8> = (0..=255u8).collect();
        let text = encode_bytes(&all);
        assert!(text.bytes().all(|b| b.is_ascii_graphic()));
    }

    #[test]
    fn test_decode_rejects_invalid_text() {
        // Arrange: '!' is outside the base64 alphabet
        let result = decode_text("not base64!");

        // Assert
        assert!(matches!(result, Err(ProtocolError::BadPayload(_))));
    }
}
