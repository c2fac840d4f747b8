//! JSON wire codec for envelopes.
//!
//! Wire format (one JSON object per transport message):
//! ```text
//! {"id":"<uuid>","direction":"outgoing","order":0,"type":"connect",
//!  "ssl":false,"method":"GET","url":"http://example.test/","headers":{...}}
//! ```
//!
//! | Field        | Present on                                             |
//! |--------------|--------------------------------------------------------|
//! | `id`         | every envelope                                         |
//! | `direction`  | every envelope (`outgoing` / `incoming`)               |
//! | `order`      | every envelope                                         |
//! | `type`       | every envelope (`connect` / `data` / `close` / `error`)|
//! | `ssl`        | every outgoing envelope, incoming `connect`            |
//! | `method`     | outgoing plain `connect`                               |
//! | `url`        | outgoing `connect`                                     |
//! | `headers`    | outgoing plain `connect`, incoming plain `connect`     |
//! | `statusCode` | incoming plain `connect`                               |
//! | `data`       | `data`, outgoing tunnel `connect` (pre-buffered head)  |
//!
//! Binary payloads in `data` use [`crate::protocol::text`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::envelope::{
    ConnectionId, Direction, Envelope, Frame, FrameKind, HeaderSet, IncomingFrame, OutgoingFrame,
};
use crate::protocol::text::{decode_text, encode_bytes};

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text is not a JSON envelope object.
    #[error("malformed envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by this envelope type is absent.
    #[error("{kind} envelope is missing field `{field}`")]
    MissingField {
        kind: FrameKind,
        field: &'static str,
    },

    /// The envelope travels the other way (for example our own message
    /// echoed back on a shared chat).
    #[error("expected an {expected} envelope, got {found}")]
    UnexpectedDirection { expected: Direction, found: Direction },

    /// The `data` payload is not valid encoded text.
    #[error("bad payload encoding: {0}")]
    BadPayload(#[from] base64::DecodeError),
}

/// Flat JSON record carrying every optional field of every frame variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub id: ConnectionId,
    pub direction: Direction,
    pub order: u64,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl WireEnvelope {
    fn new(id: ConnectionId, direction: Direction, order: u64, kind: FrameKind) -> Self {
        Self {
            id,
            direction,
            order,
            kind,
            ssl: None,
            method: None,
            url: None,
            headers: None,
            status_code: None,
            data: None,
        }
    }

    fn require<T>(&self, value: Option<T>, field: &'static str) -> Result<T, ProtocolError> {
        value.ok_or(ProtocolError::MissingField {
            kind: self.kind,
            field,
        })
    }

    fn payload(&mut self) -> Result<Bytes, ProtocolError> {
        let text = self.data.take();
        let text = self.require(text, "data")?;
        Ok(Bytes::from(decode_text(&text)?))
    }
}

/// Conversion between a typed frame and the flat wire record.
pub trait WireFrame: Sized {
    /// Writes this frame's type-specific fields into `wire`.
    fn to_wire(&self, wire: &mut WireEnvelope);

    /// Reads a frame back from a wire record whose `type` is already set.
    fn from_wire(wire: WireEnvelope) -> Result<Self, ProtocolError>;
}

impl WireFrame for OutgoingFrame {
    fn to_wire(&self, wire: &mut WireEnvelope) {
        wire.ssl = Some(self.ssl());
        match self {
            OutgoingFrame::ConnectHttp {
                method,
                url,
                headers,
            } => {
                wire.method = Some(method.clone());
                wire.url = Some(url.clone());
                wire.headers = Some(headers.clone());
            }
            OutgoingFrame::ConnectTunnel { url, head } => {
                wire.url = Some(url.clone());
                wire.data = Some(encode_bytes(head));
            }
            OutgoingFrame::Data { data, .. } => wire.data = Some(encode_bytes(data)),
            OutgoingFrame::Close { .. } | OutgoingFrame::Error { .. } => {}
        }
    }

    fn from_wire(mut wire: WireEnvelope) -> Result<Self, ProtocolError> {
        let ssl = wire.ssl.unwrap_or(false);
        Ok(match wire.kind {
            FrameKind::Connect if ssl => {
                let url = wire.url.take();
                let url = wire.require(url, "url")?;
                let head = match wire.data.take() {
                    Some(text) => Bytes::from(decode_text(&text)?),
                    None => Bytes::new(),
                };
                OutgoingFrame::ConnectTunnel { url, head }
            }
            FrameKind::Connect => {
                let url = wire.url.take();
                OutgoingFrame::ConnectHttp {
                    url: wire.require(url, "url")?,
                    method: wire.method.take().unwrap_or_else(|| "GET".to_string()),
                    headers: wire.headers.take().unwrap_or_default(),
                }
            }
            FrameKind::Data => OutgoingFrame::Data {
                ssl,
                data: wire.payload()?,
            },
            FrameKind::Close => OutgoingFrame::Close { ssl },
            FrameKind::Error => OutgoingFrame::Error { ssl },
        })
    }
}

impl WireFrame for IncomingFrame {
    fn to_wire(&self, wire: &mut WireEnvelope) {
        match self {
            IncomingFrame::ConnectHttp { status, headers } => {
                wire.ssl = Some(false);
                wire.status_code = Some(*status);
                wire.headers = Some(headers.clone());
            }
            IncomingFrame::ConnectTunnel => wire.ssl = Some(true),
            IncomingFrame::Data(data) => wire.data = Some(encode_bytes(data)),
            IncomingFrame::Close | IncomingFrame::Error => {}
        }
    }

    fn from_wire(mut wire: WireEnvelope) -> Result<Self, ProtocolError> {
        Ok(match wire.kind {
            FrameKind::Connect if wire.ssl == Some(true) => IncomingFrame::ConnectTunnel,
            FrameKind::Connect => IncomingFrame::ConnectHttp {
                status: wire.status_code.unwrap_or(200),
                headers: wire.headers.take().unwrap_or_default(),
            },
            FrameKind::Data => IncomingFrame::Data(wire.payload()?),
            FrameKind::Close => IncomingFrame::Close,
            FrameKind::Error => IncomingFrame::Error,
        })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serialises `envelope` into one transport message.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if serialisation fails.
///
/// # Examples
///
/// ```rust
/// use hot_core::protocol::{decode_envelope, encode_envelope, ConnectionId, Envelope, IncomingFrame};
///
/// let envelope = Envelope::new(ConnectionId::new(), 3, IncomingFrame::Close);
/// let text = encode_envelope(&envelope).unwrap();
/// assert_eq!(decode_envelope::<IncomingFrame>(&text).unwrap(), envelope);
/// ```
pub fn encode_envelope<F: Frame>(envelope: &Envelope<F>) -> Result<String, ProtocolError> {
    let mut wire = WireEnvelope::new(
        envelope.id,
        F::DIRECTION,
        envelope.order,
        envelope.frame.kind(),
    );
    envelope.frame.to_wire(&mut wire);
    Ok(serde_json::to_string(&wire)?)
}

/// Parses one transport message into an envelope of frame type `F`.
///
/// # Errors
///
/// - [`ProtocolError::Json`] if `text` is not an envelope object.
/// - [`ProtocolError::UnexpectedDirection`] if the envelope is not an `F`.
/// - [`ProtocolError::MissingField`] / [`ProtocolError::BadPayload`] if a
///   type-specific field is absent or undecodable.
pub fn decode_envelope<F: Frame>(text: &str) -> Result<Envelope<F>, ProtocolError> {
    let wire: WireEnvelope = serde_json::from_str(text)?;
    if wire.direction != F::DIRECTION {
        return Err(ProtocolError::UnexpectedDirection {
            expected: F::DIRECTION,
            found: wire.direction,
        });
    }
    let (id, order) = (wire.id, wire.order);
    let frame = F::from_wire(wire)?;
    Ok(Envelope { id, order, frame })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
