//! Upstream request and command types.

use bytes::Bytes;
use hot_core::protocol::HeaderSet;

/// Target of one tunnelled connection, taken from its outgoing `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamRequest {
    /// Replay a plain HTTP request against `url`.
    Http {
        method: String,
        url: String,
        headers: HeaderSet,
    },
    /// Open a raw TCP socket to `authority` (`host[:port]`, default 443)
    /// and write `head` before anything else.
    Tunnel { authority: String, head: Bytes },
}

impl UpstreamRequest {
    pub fn ssl(&self) -> bool {
        matches!(self, UpstreamRequest::Tunnel { .. })
    }

    /// Short human-readable target for log lines.
    pub fn target(&self) -> &str {
        match self {
            UpstreamRequest::Http { url, .. } => url,
            UpstreamRequest::Tunnel { authority, .. } => authority,
        }
    }
}

/// What the dispatcher asks a running upstream connection to do, in the
/// order the remote proxy half sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeCommand {
    /// Request (or tunnel) bytes to write upstream.
    Write(Bytes),
    /// The client finished sending; half-close the upstream write side.
    End,
    /// The client failed; drop the upstream connection.
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_tunnels_are_ssl() {
        let http = UpstreamRequest::Http {
            method: "GET".into(),
            url: "http://example.com/".into(),
            headers: HeaderSet::new(),
        };
        let tunnel = UpstreamRequest::Tunnel {
            authority: "example.com:443".into(),
            head: Bytes::new(),
        };
        assert!(!http.ssl());
        assert!(tunnel.ssl());
        assert_eq!(http.target(), "http://example.com/");
        assert_eq!(tunnel.target(), "example.com:443");
    }
}
