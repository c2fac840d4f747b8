//! Envelope data model shared by both halves of the tunnel.
//!
//! An [`Envelope`] is one unit on the text transport.  It names the
//! connection it belongs to ([`ConnectionId`]), its position in that
//! connection's stream (`order`), and a typed frame.  The frame type also
//! fixes the envelope's [`Direction`]:
//!
//! | Frame type        | Direction  | Produced by | Consumed by |
//! |-------------------|------------|-------------|-------------|
//! | [`OutgoingFrame`] | `outgoing` | client      | server      |
//! | [`IncomingFrame`] | `incoming` | server      | client      |
//!
//! The JSON wire form lives in [`crate::protocol::codec`].

use std::fmt;

use bytes::Bytes;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::protocol::codec::WireFrame;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Globally unique token scoping every envelope of one tunnelled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mints a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which way an envelope travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client → server (request bytes).
    Outgoing,
    /// Server → client (response bytes).
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        })
    }
}

/// The `type` discriminant of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Connect,
    Data,
    Close,
    Error,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameKind::Connect => "connect",
            FrameKind::Data => "data",
            FrameKind::Close => "close",
            FrameKind::Error => "error",
        })
    }
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// Header names that only describe the hop between proxy and peer.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

/// Ordered list of HTTP header name/value pairs.
///
/// Repeated names are allowed (for example several `set-cookie` lines).  On
/// the wire the set is a JSON object whose values are a string, or an array
/// of strings when a name repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet(Vec<(String, String)>);

impl HeaderSet {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends one header line.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if any header is named `name` (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collects an `http` header map, keeping repeated names.
    ///
    /// Values that are not valid UTF-8 are converted lossily.
    pub fn from_header_map(map: &http::HeaderMap) -> Self {
        map.iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }

    /// Builds an `http` header map, skipping names or values `http` rejects.
    pub fn to_header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            match (
                http::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => tracing::debug!(header = %name, "skipping invalid header"),
            }
        }
        map
    }

    /// Copy of this set with connection-scoped headers removed.
    pub fn without_hop_by_hop(&self) -> Self {
        self.0
            .iter()
            .filter(|(n, _)| !HOP_BY_HOP.iter().any(|h| n.eq_ignore_ascii_case(h)))
            .cloned()
            .collect()
    }
}

impl FromIterator<(String, String)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for HeaderSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        // Group repeated names, keeping first-appearance order.
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
        for (name, value) in &self.0 {
            match grouped.iter_mut().find(|(n, _)| *n == name.as_str()) {
                Some((_, values)) => values.push(value.as_str()),
                None => grouped.push((name.as_str(), vec![value.as_str()])),
            }
        }

        let mut map = serializer.serialize_map(Some(grouped.len()))?;
        for (name, values) in grouped {
            match values.as_slice() {
                [single] => map.serialize_entry(name, single)?,
                many => map.serialize_entry(name, many)?,
            }
        }
        map.end()
    }
}

/// Any JSON scalar or list a peer may use as a header value.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
    List(Vec<Option<LooseValue>>),
}

impl LooseValue {
    fn flatten_into(self, out: &mut Vec<String>) {
        match self {
            LooseValue::Text(s) => out.push(s),
            LooseValue::Number(n) => out.push(n.to_string()),
            LooseValue::Flag(b) => out.push(b.to_string()),
            LooseValue::List(items) => {
                for item in items.into_iter().flatten() {
                    item.flatten_into(out);
                }
            }
        }
    }
}

struct HeaderSetVisitor;

impl<'de> Visitor<'de> for HeaderSetVisitor {
    type Value = HeaderSet;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a header object or a flat [name, value, ...] array")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<HeaderSet, A::Error> {
        let mut headers = HeaderSet::new();
        while let Some((name, value)) = access.next_entry::<String, Option<LooseValue>>()? {
            let mut values = Vec::new();
            if let Some(value) = value {
                value.flatten_into(&mut values);
            }
            for value in values {
                headers.push(name.clone(), value);
            }
        }
        Ok(headers)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<HeaderSet, A::Error> {
        let mut headers = HeaderSet::new();
        while let Some(name) = access.next_element::<String>()? {
            let value = access
                .next_element::<String>()?
                .ok_or_else(|| de::Error::custom(format!("header {name:?} has no value")))?;
            headers.push(name, value);
        }
        Ok(headers)
    }
}

impl<'de> Deserialize<'de> for HeaderSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(HeaderSetVisitor)
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Common behaviour of [`OutgoingFrame`] and [`IncomingFrame`].
///
/// Lets the emitter and the dispatchers build data and terminal frames
/// without knowing which direction they work in.
pub trait Frame: WireFrame + Clone + fmt::Debug + Send + 'static {
    /// Direction every envelope carrying this frame type travels in.
    const DIRECTION: Direction;

    fn data(ssl: bool, data: Bytes) -> Self;
    fn close(ssl: bool) -> Self;
    fn error(ssl: bool) -> Self;
    fn kind(&self) -> FrameKind;
}

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingFrame {
    /// Open a plain HTTP request upstream.
    ConnectHttp {
        method: String,
        url: String,
        headers: HeaderSet,
    },
    /// Open a raw tunnel to `url` (`host[:port]`), writing `head` first.
    ConnectTunnel { url: String, head: Bytes },
    Data { ssl: bool, data: Bytes },
    Close { ssl: bool },
    Error { ssl: bool },
}

impl OutgoingFrame {
    /// Whether the connection this frame belongs to is a tunnel.
    pub fn ssl(&self) -> bool {
        match self {
            OutgoingFrame::ConnectHttp { .. } => false,
            OutgoingFrame::ConnectTunnel { .. } => true,
            OutgoingFrame::Data { ssl, .. }
            | OutgoingFrame::Close { ssl }
            | OutgoingFrame::Error { ssl } => *ssl,
        }
    }
}

impl Frame for OutgoingFrame {
    const DIRECTION: Direction = Direction::Outgoing;

    fn data(ssl: bool, data: Bytes) -> Self {
        OutgoingFrame::Data { ssl, data }
    }

    fn close(ssl: bool) -> Self {
        OutgoingFrame::Close { ssl }
    }

    fn error(ssl: bool) -> Self {
        OutgoingFrame::Error { ssl }
    }

    fn kind(&self) -> FrameKind {
        match self {
            OutgoingFrame::ConnectHttp { .. } | OutgoingFrame::ConnectTunnel { .. } => {
                FrameKind::Connect
            }
            OutgoingFrame::Data { .. } => FrameKind::Data,
            OutgoingFrame::Close { .. } => FrameKind::Close,
            OutgoingFrame::Error { .. } => FrameKind::Error,
        }
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingFrame {
    /// Upstream response head for a plain HTTP request.
    ConnectHttp { status: u16, headers: HeaderSet },
    /// Upstream tunnel socket is open.
    ConnectTunnel,
    Data(Bytes),
    Close,
    Error,
}

impl Frame for IncomingFrame {
    const DIRECTION: Direction = Direction::Incoming;

    fn data(_ssl: bool, data: Bytes) -> Self {
        IncomingFrame::Data(data)
    }

    fn close(_ssl: bool) -> Self {
        IncomingFrame::Close
    }

    fn error(_ssl: bool) -> Self {
        IncomingFrame::Error
    }

    fn kind(&self) -> FrameKind {
        match self {
            IncomingFrame::ConnectHttp { .. } | IncomingFrame::ConnectTunnel => FrameKind::Connect,
            IncomingFrame::Data(_) => FrameKind::Data,
            IncomingFrame::Close => FrameKind::Close,
            IncomingFrame::Error => FrameKind::Error,
        }
    }
}

/// One wire unit: a frame tagged with its connection and sequence position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<F> {
    pub id: ConnectionId,
    pub order: u64,
    pub frame: F,
}

impl<F: Frame> Envelope<F> {
    pub fn new(id: ConnectionId, order: u64, frame: F) -> Self {
        Self { id, order, frame }
    }

    pub fn direction(&self) -> Direction {
        F::DIRECTION
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
