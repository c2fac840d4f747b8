//! Local HTTP/HTTPS proxy listener.
//!
//! Browsers and command-line tools point their proxy setting here.  Each
//! accepted TCP connection is served by hyper's HTTP/1 server; each request
//! on it becomes one tunnelled connection:
//!
//! - **Plain requests** (`GET http://host/path`): the request line and
//!   headers become the outgoing `connect`, the request body streams out as
//!   `data`, and the remote response comes back as a streaming hyper body.
//! - **`CONNECT host:port`**: once the remote half reports the tunnel open,
//!   the client gets `200 Connection established` and the upgraded socket is
//!   pumped both ways as raw bytes.  TLS stays end to end; nothing here looks
//!   inside it.
//!
//! # Local status codes
//!
//! | Situation                                  | Local answer               |
//! |--------------------------------------------|----------------------------|
//! | remote `error` before any response head    | `500 Connection error`     |
//! | remote `close` before any response head    | `502 Bad Gateway`          |
//! | remote `error` after the head              | response body aborted      |
//! | dispatcher stopped                         | `503 Service Unavailable`  |
//!
//! # Shutdown
//!
//! The accept loop polls the shared `running` flag every 200 ms, like every
//! other listener in the workspace.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use futures_util::Stream;
use http::header::HOST;
use http::request::Parts;
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::ext::ReasonPhrase;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use hot_core::protocol::{ConnectionId, HeaderSet, OutgoingFrame};
use hot_core::Emitter;
use hot_transport::open_link;

use crate::domain::{LocalRequest, ResponseHead};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::pipe::{ChannelPipe, PipeEvent};
use crate::infrastructure::runner::{spawn_frontend, FrontendHandle};

/// Response body type served to local clients.
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// Read buffer for the upgraded side of a `CONNECT` tunnel.
const TUNNEL_READ_BUF: usize = 16 * 1024;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the proxy, opens the transport, and serves until `running` clears.
///
/// # Errors
///
/// Returns an error if the listen address is invalid or cannot be bound, or
/// if the transport cannot be opened.
pub async fn run_client(config: ClientConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listen: SocketAddr = config
        .proxy
        .listen
        .parse()
        .with_context(|| format!("invalid proxy listen address '{}'", config.proxy.listen))?;
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind proxy listener on {listen}"))?;

    let link = open_link(&config.transport)
        .await
        .context("failed to open transport")?;
    let frontend = spawn_frontend(link, config.tunnel);

    run_proxy(listener, frontend, running).await
}

/// Accepts local clients on `listener` until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener has no local address.
pub async fn run_proxy(
    listener: TcpListener,
    frontend: FrontendHandle,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("proxy listener has no local address")?;
    info!("proxy listening on {local}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("local client connected from {peer}");
                tokio::spawn(serve_client(stream, peer, frontend.clone()));
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

/// Handles one proxied request.
pub async fn proxy(req: Request<Incoming>, frontend: FrontendHandle) -> Response<ProxyBody> {
    if req.method() == Method::CONNECT {
        proxy_tunnel(req, frontend).await
    } else {
        proxy_http(req, frontend).await
    }
}

// ── Per-connection handling ───────────────────────────────────────────────────

async fn serve_client(stream: TcpStream, peer: SocketAddr, frontend: FrontendHandle) {
    let service = service_fn(move |req| {
        let frontend = frontend.clone();
        async move { Ok::<_, Infallible>(proxy(req, frontend).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!("local client {peer} connection ended with error: {e}");
    }
}

async fn proxy_http(req: Request<Incoming>, frontend: FrontendHandle) -> Response<ProxyBody> {
    let (parts, body) = req.into_parts();
    let request = LocalRequest::Http {
        method: parts.method.to_string(),
        url: absolute_url(&parts),
        headers: HeaderSet::from_header_map(&parts.headers).without_hop_by_hop(),
    };

    let (pipe, mut events) = ChannelPipe::new();
    let Some(emitter) = frontend.open(request, Box::new(pipe)).await else {
        return status_response(StatusCode::SERVICE_UNAVAILABLE, None);
    };
    let id = emitter.id();
    // Armed until the response is handed over: hyper drops this future if
    // the client disconnects while the head is still on its way.
    let mut guard = LocalGuard::new(id, frontend);
    tokio::spawn(pump_request_body(body, emitter));

    match events.recv().await {
        Some(PipeEvent::Head(ResponseHead::Http { status, headers })) => {
            streaming_response(status, &headers, ResponseStream { events, guard })
        }
        Some(PipeEvent::Fail) => {
            guard.disarm();
            connection_error()
        }
        other => {
            // The armed guard reports the failure when it drops.
            debug!(%id, ?other, "no response head before the stream ended");
            status_response(StatusCode::BAD_GATEWAY, None)
        }
    }
}

async fn proxy_tunnel(req: Request<Incoming>, frontend: FrontendHandle) -> Response<ProxyBody> {
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return status_response(StatusCode::BAD_REQUEST, None);
    };

    // hyper has consumed nothing past the request head, so there is no
    // pre-read client data to forward.
    let request = LocalRequest::Tunnel {
        authority,
        head: Bytes::new(),
    };
    let (pipe, mut events) = ChannelPipe::new();
    let Some(emitter) = frontend.open(request, Box::new(pipe)).await else {
        return status_response(StatusCode::SERVICE_UNAVAILABLE, None);
    };
    let id = emitter.id();
    let mut guard = LocalGuard::new(id, frontend);

    match events.recv().await {
        Some(PipeEvent::Head(ResponseHead::TunnelEstablished)) => {
            tokio::spawn(run_tunnel(req, emitter, events, guard));
            status_response(StatusCode::OK, Some("Connection established"))
        }
        Some(PipeEvent::Fail) => {
            guard.disarm();
            connection_error()
        }
        other => {
            debug!(%id, ?other, "tunnel ended before it was established");
            status_response(StatusCode::BAD_GATEWAY, None)
        }
    }
}

/// Streams the local request body out as `data`, then `close` (or `error`
/// if the client broke off mid-body).
async fn pump_request_body(mut body: Incoming, emitter: Emitter<OutgoingFrame>) {
    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    if !data.is_empty() {
                        emitter.emit_data(data);
                    }
                }
            }
            Some(Err(e)) => {
                debug!(id = %emitter.id(), "request body failed: {e}");
                emitter.error();
                return;
            }
            None => {
                emitter.close();
                return;
            }
        }
    }
}

async fn run_tunnel(
    req: Request<Incoming>,
    emitter: Emitter<OutgoingFrame>,
    mut events: mpsc::UnboundedReceiver<PipeEvent>,
    mut guard: LocalGuard,
) {
    let id = emitter.id();
    let upgraded = match hyper::upgrade::on(req).await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            warn!(%id, "CONNECT upgrade failed: {e}");
            return;
        }
    };
    let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));

    let upload = async {
        let mut buf = vec![0u8; TUNNEL_READ_BUF];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    emitter.close();
                    break;
                }
                Ok(n) => emitter.emit_data(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    debug!(%id, "tunnel read failed: {e}");
                    emitter.error();
                    break;
                }
            }
        }
    };

    let download = async {
        while let Some(event) = events.recv().await {
            match event {
                PipeEvent::Data(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!(%id, "tunnel write failed: {e}");
                        return;
                    }
                }
                PipeEvent::End | PipeEvent::Fail => break,
                PipeEvent::Head(_) => {}
            }
        }
        guard.disarm();
        let _ = writer.shutdown().await;
    };

    tokio::join!(upload, download);
    debug!(%id, "tunnel finished");
}

// ── Response body ─────────────────────────────────────────────────────────────

/// Reports [`FrontendEvent::LocalFailed`](crate::application::FrontendEvent)
/// when dropped while still armed, i.e. when the local side went away before
/// the remote side finished.
///
/// Armed as soon as the connection is opened and carried from the request
/// future into the response body or the tunnel task.
struct LocalGuard {
    id: ConnectionId,
    frontend: FrontendHandle,
    armed: bool,
}

impl LocalGuard {
    fn new(id: ConnectionId, frontend: FrontendHandle) -> Self {
        Self {
            id,
            frontend,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LocalGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(id = %self.id, "local client went away");
            self.frontend.local_failed(self.id);
        }
    }
}

/// Pipe events after the head, as hyper body frames.
struct ResponseStream {
    events: mpsc::UnboundedReceiver<PipeEvent>,
    guard: LocalGuard,
}

impl Stream for ResponseStream {
    type Item = Result<Frame<Bytes>, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.events.poll_recv(cx)) {
                Some(PipeEvent::Data(data)) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                Some(PipeEvent::End) => {
                    self.guard.disarm();
                    return Poll::Ready(None);
                }
                Some(PipeEvent::Fail) => {
                    self.guard.disarm();
                    return Poll::Ready(Some(Err(io::Error::other("upstream connection failed"))));
                }
                Some(PipeEvent::Head(_)) => continue,
                None => {
                    self.guard.disarm();
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "dispatcher dropped the connection",
                    ))));
                }
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// The request target as an absolute URL.  Origin-form targets (a client
/// talking to the proxy as if it were the server) are completed from `Host`.
fn absolute_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() {
        return parts.uri.to_string();
    }
    match parts.headers.get(HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{host}{}", parts.uri),
        None => parts.uri.to_string(),
    }
}

fn streaming_response(status: u16, headers: &HeaderSet, body: ResponseStream) -> Response<ProxyBody> {
    let Ok(status) = StatusCode::from_u16(status) else {
        warn!("upstream sent invalid status {status}");
        return status_response(StatusCode::BAD_GATEWAY, None);
    };
    let mut response = Response::new(StreamBody::new(body).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = headers.without_hop_by_hop().to_header_map();
    response
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn status_response(status: StatusCode, reason: Option<&'static str>) -> Response<ProxyBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = status;
    if let Some(reason) = reason {
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(reason.as_bytes()));
    }
    response
}

fn connection_error() -> Response<ProxyBody> {
    status_response(StatusCode::INTERNAL_SERVER_ERROR, Some("Connection error"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
