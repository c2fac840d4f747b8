//! Real upstream connections: raw TCP tunnels and plain HTTP requests.
//!
//! [`TcpUpstream`] implements the [`Upstream`] port.  Every `open` spawns one
//! task that owns the socket for the life of the connection:
//!
//! - **Tunnel** (`CONNECT`): dial `host:port`, write the request head,
//!   announce the tunnel, then copy bytes both ways until either side ends.
//! - **HTTP**: dial the URL's host, replay the request with hyper's HTTP/1
//!   client (streaming the body from the pipe commands), then send the
//!   response head, the body as data frames, and `close`.
//!
//! Any failure is reported to the remote proxy half as an `error` frame.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderValue, Method, Request};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::Frame;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::{Host, Url};

use hot_core::protocol::{split_host_port, HeaderSet, IncomingFrame};
use hot_core::Emitter;

use crate::application::{Upstream, UpstreamLink};
use crate::domain::{PipeCommand, UpstreamRequest};

/// Request body type handed to hyper's client.
type UpstreamBody = UnsyncBoxBody<Bytes, io::Error>;

/// Bytes read from an upstream tunnel socket per data emission.
const TUNNEL_READ_BUF: usize = 16 * 1024;

/// Port used when a `CONNECT` authority names none.
const DEFAULT_TUNNEL_PORT: u16 = 443;

/// Port used when an `http://` URL names none.
const DEFAULT_HTTP_PORT: u16 = 80;

/// Default upper bound on dialling an upstream host.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why an upstream connection failed.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported URL scheme '{0}' (only http is replayed)")]
    UnsupportedScheme(String),

    #[error("request URL has no host")]
    MissingHost,

    #[error("invalid request method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("upstream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("upstream HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("could not build upstream request: {0}")]
    Request(#[from] http::Error),
}

// ── TcpUpstream ───────────────────────────────────────────────────────────────

/// Opens upstream connections over plain TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpUpstream {
    connect_timeout: Duration,
}

impl TcpUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpUpstream {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Upstream for TcpUpstream {
    fn open(&self, request: UpstreamRequest, link: UpstreamLink) {
        let connect_timeout = self.connect_timeout;
        tokio::spawn(async move {
            match request {
                UpstreamRequest::Tunnel { authority, head } => {
                    run_tunnel(&authority, head, link, connect_timeout).await
                }
                UpstreamRequest::Http {
                    method,
                    url,
                    headers,
                } => run_http(&method, &url, &headers, link, connect_timeout).await,
            }
        });
    }
}

async fn connect(host: &str, port: u16, limit: Duration) -> Result<TcpStream, UpstreamError> {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(UpstreamError::ConnectTimeout(format!("{host}:{port}"))),
    }
}

// ── Tunnels ───────────────────────────────────────────────────────────────────

/// How a tunnel's copy loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TunnelEnd {
    /// Upstream closed its side.
    Eof,
    /// A socket read or write failed.
    Failed,
    /// The client side asked for the connection to be dropped.
    Aborted,
}

async fn run_tunnel(authority: &str, head: Bytes, link: UpstreamLink, connect_timeout: Duration) {
    let UpstreamLink {
        emitter,
        mut commands,
        events,
    } = link;
    let id = emitter.id();
    let (host, port) = split_host_port(authority, DEFAULT_TUNNEL_PORT);

    let mut stream = match connect(&host, port, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%id, %authority, "tunnel connect failed: {e}");
            emitter.error();
            events.finished(true);
            return;
        }
    };
    if !head.is_empty() {
        if let Err(e) = stream.write_all(&head).await {
            warn!(%id, %authority, "failed to write tunnel head: {e}");
            emitter.error();
            events.finished(true);
            return;
        }
    }

    info!(%id, "tunnel to {host}:{port} established");
    emitter.emit(IncomingFrame::ConnectTunnel);
    events.established();

    let end = pump_tunnel(stream, &emitter, &mut commands).await;
    debug!(%id, ?end, "tunnel finished");
    match end {
        TunnelEnd::Eof | TunnelEnd::Aborted => emitter.close(),
        TunnelEnd::Failed => emitter.error(),
    }
    events.finished(end != TunnelEnd::Eof);
}

/// Copies upstream reads out as data frames and applies pipe commands to
/// the write side until the tunnel ends.
async fn pump_tunnel(
    stream: TcpStream,
    emitter: &Emitter<IncomingFrame>,
    commands: &mut mpsc::UnboundedReceiver<PipeCommand>,
) -> TunnelEnd {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; TUNNEL_READ_BUF];
    let mut accepting = true;

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => return TunnelEnd::Eof,
                Ok(n) => emitter.emit_data(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    debug!(id = %emitter.id(), "tunnel read failed: {e}");
                    return TunnelEnd::Failed;
                }
            },
            command = commands.recv(), if accepting => match command {
                Some(PipeCommand::Write(data)) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!(id = %emitter.id(), "tunnel write failed: {e}");
                        return TunnelEnd::Failed;
                    }
                }
                Some(PipeCommand::End) => {
                    // Half-close; keep reading whatever upstream still sends.
                    let _ = writer.shutdown().await;
                    accepting = false;
                }
                Some(PipeCommand::Abort) => return TunnelEnd::Aborted,
                None => accepting = false,
            },
        }
    }
}

// ── Plain HTTP ────────────────────────────────────────────────────────────────

async fn run_http(
    method: &str,
    url: &str,
    headers: &HeaderSet,
    link: UpstreamLink,
    connect_timeout: Duration,
) {
    let UpstreamLink {
        emitter,
        commands,
        events,
    } = link;
    let id = emitter.id();

    let result = forward_http(
        method,
        url,
        headers,
        commands,
        &emitter,
        || events.established(),
        connect_timeout,
    )
    .await;
    match result {
        Ok(()) => {
            debug!(%id, "upstream response complete");
            emitter.close();
            events.finished(false);
        }
        Err(e) => {
            warn!(%id, %method, %url, "upstream request failed: {e}");
            emitter.error();
            events.finished(true);
        }
    }
}

/// Replays one request and streams its response out through `emitter`.
///
/// `on_connected` runs once the upstream socket is open.
async fn forward_http(
    method: &str,
    url: &str,
    headers: &HeaderSet,
    commands: mpsc::UnboundedReceiver<PipeCommand>,
    emitter: &Emitter<IncomingFrame>,
    on_connected: impl FnOnce(),
    connect_timeout: Duration,
) -> Result<(), UpstreamError> {
    let target = Url::parse(url)?;
    if target.scheme() != "http" {
        return Err(UpstreamError::UnsupportedScheme(target.scheme().to_string()));
    }
    let host = match target.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => return Err(UpstreamError::MissingHost),
    };
    let port = target.port_or_known_default().unwrap_or(DEFAULT_HTTP_PORT);
    let method = Method::from_bytes(method.as_bytes())?;

    let stream = connect(&host, port, connect_timeout).await?;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake::<_, UpstreamBody>(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("upstream connection ended: {e}");
        }
    });
    on_connected();

    let request = build_request(method, &target, headers, commands)?;
    let response = sender.send_request(request).await?;

    let (parts, mut body) = response.into_parts();
    emitter.emit(IncomingFrame::ConnectHttp {
        status: parts.status.as_u16(),
        headers: HeaderSet::from_header_map(&parts.headers),
    });
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            emitter.emit_data(data);
        }
    }
    Ok(())
}

/// Builds the origin-form request sent upstream.
///
/// Connection-scoped headers are dropped and `Host` is filled in from the
/// URL when the client sent none.  A body is streamed from `commands` only
/// when the client declared one.
fn build_request(
    method: Method,
    target: &Url,
    headers: &HeaderSet,
    commands: mpsc::UnboundedReceiver<PipeCommand>,
) -> Result<Request<UpstreamBody>, UpstreamError> {
    let has_body = headers.contains(CONTENT_LENGTH.as_str())
        || headers.contains(TRANSFER_ENCODING.as_str());
    let body = if has_body {
        command_body(commands)
    } else {
        Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync()
    };

    let mut path = target.path().to_string();
    if let Some(query) = target.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut request = Request::builder().method(method).uri(path).body(body)?;
    let mut map = headers.without_hop_by_hop().to_header_map();
    if !map.contains_key(HOST) {
        let authority = match (target.host_str(), target.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(UpstreamError::MissingHost),
        };
        if let Ok(value) = HeaderValue::from_str(&authority) {
            map.insert(HOST, value);
        }
    }
    *request.headers_mut() = map;
    Ok(request)
}

/// Request body fed by `Write` commands, ending at `End` and failing on
/// `Abort`.
fn command_body(commands: mpsc::UnboundedReceiver<PipeCommand>) -> UpstreamBody {
    let stream = futures_util::stream::unfold(commands, |mut commands| async move {
        match commands.recv().await? {
            PipeCommand::Write(data) => Some((Ok(Frame::data(data)), commands)),
            PipeCommand::End => None,
            PipeCommand::Abort => Some((
                Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "client aborted the request",
                )),
                commands,
            )),
        }
    });
    StreamBody::new(stream).boxed_unsync()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn url(text: &str) -> Url {
        Url::parse(text).unwrap()
    }

    fn no_commands() -> mpsc::UnboundedReceiver<PipeCommand> {
        mpsc::unbounded_channel().1
    }

    #[test]
    fn test_build_request_uses_origin_form_and_keeps_query() {
        let request = build_request(
            Method::GET,
            &url("http://example.com:8080/a/b?x=1&y=2"),
            &HeaderSet::new(),
            no_commands(),
        )
        .unwrap();

        assert_eq!(request.uri(), "/a/b?x=1&y=2");
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.headers()[HOST], "example.com:8080");
    }

    #[test]
    fn test_build_request_keeps_client_host_and_drops_hop_by_hop() {
        // Arrange
        let mut headers = HeaderSet::new();
        headers.push("Host", "virtual.example");
        headers.push("Connection", "keep-alive");
        headers.push("Proxy-Connection", "keep-alive");
        headers.push("Accept", "text/html");
        headers.push("Accept", "*/*");

        // Act
        let request =
            build_request(Method::GET, &url("http://10.0.0.1/"), &headers, no_commands()).unwrap();

        // Assert
        let map = request.headers();
        assert_eq!(map[HOST], "virtual.example");
        assert!(!map.contains_key("connection"));
        assert!(!map.contains_key("proxy-connection"));
        assert_eq!(map.get_all("accept").iter().count(), 2);
    }

    #[tokio::test]
    async fn test_command_body_streams_writes_until_end() {
        // Arrange
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(PipeCommand::Write(Bytes::from_static(b"hello "))).unwrap();
        tx.send(PipeCommand::Write(Bytes::from_static(b"world"))).unwrap();
        tx.send(PipeCommand::End).unwrap();

        // Act
        let collected = command_body(rx).collect().await.unwrap().to_bytes();

        // Assert
        assert_eq!(collected, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_command_body_fails_on_abort() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(PipeCommand::Write(Bytes::from_static(b"partial"))).unwrap();
        tx.send(PipeCommand::Abort).unwrap();

        let result = command_body(rx).collect().await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_https_url_is_rejected_before_dialling() {
        let emitter_transport = hot_transport::mock::RecordingTransport::new();
        let emitter = Emitter::new(
            hot_core::ConnectionId::new(),
            false,
            std::sync::Arc::new(hot_core::Sequencer::new()),
            emitter_transport,
            0,
        );

        let result = forward_http(
            "GET",
            "https://example.com/",
            &HeaderSet::new(),
            no_commands(),
            &emitter,
            || panic!("must not connect"),
            DEFAULT_CONNECT_TIMEOUT,
        )
        .await;

        assert!(matches!(result, Err(UpstreamError::UnsupportedScheme(s)) if s == "https"));
    }

    #[tokio::test]
    async fn test_invalid_method_is_rejected() {
        let emitter = Emitter::new(
            hot_core::ConnectionId::new(),
            false,
            std::sync::Arc::new(hot_core::Sequencer::new()),
            hot_transport::mock::RecordingTransport::new(),
            0,
        );

        let result = forward_http(
            "BAD METHOD",
            "http://example.com/",
            &HeaderSet::new(),
            no_commands(),
            &emitter,
            || panic!("must not connect"),
            DEFAULT_CONNECT_TIMEOUT,
        )
        .await;

        assert!(matches!(result, Err(UpstreamError::Method(_))));
    }
}
