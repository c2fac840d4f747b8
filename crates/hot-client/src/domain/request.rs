//! Local request and response-head types.
//!
//! A [`LocalRequest`] is what the proxy listener learned from the local
//! client before any body bytes: either a plain HTTP request line plus
//! headers, or a `CONNECT` target.  It turns into the outgoing `connect`
//! frame at order 0.
//!
//! A [`ResponseHead`] is the local rendering of an incoming `connect`.

use bytes::Bytes;
use hot_core::protocol::{HeaderSet, OutgoingFrame};

/// What the local client asked the proxy to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRequest {
    /// A plain proxied request, e.g. `GET http://example.com/ HTTP/1.1`.
    Http {
        method: String,
        /// Absolute URL, query string included.
        url: String,
        headers: HeaderSet,
    },
    /// A `CONNECT host:port` tunnel.
    Tunnel {
        /// `host:port` from the request target.
        authority: String,
        /// Bytes the client sent after the request head, if any were read.
        head: Bytes,
    },
}

impl LocalRequest {
    /// `true` for tunnels; fixes the `ssl` flag of every outgoing envelope.
    pub fn ssl(&self) -> bool {
        matches!(self, LocalRequest::Tunnel { .. })
    }

    /// Short human-readable target for log lines.
    pub fn target(&self) -> &str {
        match self {
            LocalRequest::Http { url, .. } => url,
            LocalRequest::Tunnel { authority, .. } => authority,
        }
    }

    /// The outgoing `connect` frame announcing this request.
    pub fn into_connect_frame(self) -> OutgoingFrame {
        match self {
            LocalRequest::Http {
                method,
                url,
                headers,
            } => OutgoingFrame::ConnectHttp {
                method,
                url,
                headers,
            },
            LocalRequest::Tunnel { authority, head } => OutgoingFrame::ConnectTunnel {
                url: authority,
                head,
            },
        }
    }
}

/// The first thing written back to a local client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHead {
    /// Status line and headers of a plain HTTP response.
    Http { status: u16, headers: HeaderSet },
    /// The remote tunnel is open; answer `200 Connection established`.
    TunnelEstablished,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
