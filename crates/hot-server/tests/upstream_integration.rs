//! Integration tests for `TcpUpstream` against real local sockets.
//!
//! Each test hands the connector an `UpstreamLink` built by hand, then checks
//! the incoming envelopes recorded by a `RecordingTransport` and the
//! lifecycle events the task reports.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::HOST;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use hot_core::protocol::{ConnectionId, HeaderSet, IncomingFrame};
use hot_core::{Emitter, Sequencer};
use hot_server::application::{BackendEvent, Upstream, UpstreamEvent, UpstreamEvents, UpstreamLink};
use hot_server::domain::{PipeCommand, UpstreamRequest};
use hot_server::infrastructure::TcpUpstream;
use hot_transport::mock::RecordingTransport;

const WAIT: Duration = Duration::from_secs(5);

struct OpenedUpstream {
    transport: Arc<RecordingTransport>,
    commands: mpsc::UnboundedSender<PipeCommand>,
    events: mpsc::UnboundedReceiver<BackendEvent>,
}

/// Opens `request` on a fresh `TcpUpstream` and returns the test's ends.
fn open(request: UpstreamRequest) -> OpenedUpstream {
    let transport = RecordingTransport::new();
    let id = ConnectionId::new();
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events) = mpsc::unbounded_channel();
    let link = UpstreamLink {
        emitter: Emitter::new(
            id,
            request.ssl(),
            Arc::new(Sequencer::new()),
            transport.clone(),
            0,
        ),
        commands: commands_rx,
        events: UpstreamEvents::new(id, events_tx),
    };
    TcpUpstream::new(Duration::from_secs(2)).open(request, link);
    OpenedUpstream {
        transport,
        commands,
        events,
    }
}

/// Waits for the task's `finished` report and returns its `failed` flag.
/// Also returns whether `established` came first.
async fn wait_finished(events: &mut mpsc::UnboundedReceiver<BackendEvent>) -> (bool, bool) {
    let mut established = false;
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        match event {
            BackendEvent::Upstream(UpstreamEvent::Established(_)) => established = true,
            BackendEvent::Upstream(UpstreamEvent::Finished { failed, .. }) => {
                return (established, failed)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

fn frames(transport: &RecordingTransport) -> Vec<IncomingFrame> {
    let envelopes = transport.envelopes::<IncomingFrame>();
    for (expected, envelope) in envelopes.iter().enumerate() {
        assert_eq!(envelope.order, expected as u64);
    }
    envelopes.into_iter().map(|e| e.frame).collect()
}

fn data_of(frames: &[IncomingFrame]) -> Vec<u8> {
    frames
        .iter()
        .filter_map(|f| match f {
            IncomingFrame::Data(data) => Some(data.to_vec()),
            _ => None,
        })
        .flatten()
        .collect()
}

// ── Tunnels ───────────────────────────────────────────────────────────────────

/// Echoes one connection back until the peer half-closes.
async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr.to_string()
}

#[tokio::test]
async fn test_tunnel_writes_head_then_echoes_until_eof() {
    // Arrange
    let authority = echo_server().await;
    let mut opened = open(UpstreamRequest::Tunnel {
        authority,
        head: Bytes::from_static(b"HEAD"),
    });

    // Act
    opened
        .commands
        .send(PipeCommand::Write(Bytes::from_static(b"ping")))
        .unwrap();
    opened.commands.send(PipeCommand::End).unwrap();
    let (established, failed) = wait_finished(&mut opened.events).await;

    // Assert
    assert!(established);
    assert!(!failed);
    let frames = frames(&opened.transport);
    assert_eq!(frames.first(), Some(&IncomingFrame::ConnectTunnel));
    assert_eq!(frames.last(), Some(&IncomingFrame::Close));
    assert_eq!(data_of(&frames), b"HEADping");
}

#[tokio::test]
async fn test_tunnel_to_closed_port_reports_error() {
    // Arrange: grab a free port, then release it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = listener.local_addr().unwrap().to_string();
    drop(listener);

    // Act
    let mut opened = open(UpstreamRequest::Tunnel {
        authority,
        head: Bytes::new(),
    });
    let (established, failed) = wait_finished(&mut opened.events).await;

    // Assert
    assert!(!established);
    assert!(failed);
    assert_eq!(frames(&opened.transport), vec![IncomingFrame::Error]);
}

#[tokio::test]
async fn test_tunnel_abort_drops_socket_and_closes() {
    let authority = echo_server().await;
    let mut opened = open(UpstreamRequest::Tunnel {
        authority,
        head: Bytes::new(),
    });

    opened.commands.send(PipeCommand::Abort).unwrap();
    let (_, failed) = wait_finished(&mut opened.events).await;

    assert!(failed);
    assert_eq!(
        frames(&opened.transport),
        vec![IncomingFrame::ConnectTunnel, IncomingFrame::Close]
    );
}

// ── Plain HTTP ────────────────────────────────────────────────────────────────

/// Serves one HTTP/1 connection, answering `METHOD URI|HOST|BODY`.
async fn describe_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let service = service_fn(|req: Request<Incoming>| async move {
            let line = format!("{} {}", req.method(), req.uri());
            let host = req
                .headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let text = format!("{line}|{host}|{}", String::from_utf8_lossy(&body));
            Ok::<_, Infallible>(
                Response::builder()
                    .header("x-test", "yes")
                    .body(Full::new(Bytes::from(text)))
                    .unwrap(),
            )
        });
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await;
    });
    addr.to_string()
}

#[tokio::test]
async fn test_http_get_streams_head_body_and_close() {
    // Arrange
    let authority = describe_server().await;
    let mut opened = open(UpstreamRequest::Http {
        method: "GET".into(),
        url: format!("http://{authority}/greet?name=x"),
        headers: HeaderSet::new(),
    });

    // Act: no body was declared, so the task may already have dropped its
    // command receiver
    let _ = opened.commands.send(PipeCommand::End);
    let (established, failed) = wait_finished(&mut opened.events).await;

    // Assert
    assert!(established);
    assert!(!failed);
    let frames = frames(&opened.transport);
    match &frames[0] {
        IncomingFrame::ConnectHttp { status, headers } => {
            assert_eq!(*status, 200);
            assert_eq!(headers.get("x-test"), Some("yes"));
        }
        other => panic!("expected a response head, got {other:?}"),
    }
    assert_eq!(frames.last(), Some(&IncomingFrame::Close));
    let body = String::from_utf8(data_of(&frames)).unwrap();
    assert_eq!(body, format!("GET /greet?name=x|{authority}|"));
}

#[tokio::test]
async fn test_http_post_body_comes_from_write_commands() {
    // Arrange
    let authority = describe_server().await;
    let mut headers = HeaderSet::new();
    headers.push("Host", "named.example");
    headers.push("Content-Length", "6");
    let mut opened = open(UpstreamRequest::Http {
        method: "POST".into(),
        url: format!("http://{authority}/submit"),
        headers,
    });

    // Act
    opened
        .commands
        .send(PipeCommand::Write(Bytes::from_static(b"abc")))
        .unwrap();
    opened
        .commands
        .send(PipeCommand::Write(Bytes::from_static(b"def")))
        .unwrap();
    opened.commands.send(PipeCommand::End).unwrap();
    let (_, failed) = wait_finished(&mut opened.events).await;

    // Assert
    assert!(!failed);
    let body = String::from_utf8(data_of(&frames(&opened.transport))).unwrap();
    assert_eq!(body, "POST /submit|named.example|abcdef");
}

#[tokio::test]
async fn test_http_to_closed_port_reports_error_without_head() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut opened = open(UpstreamRequest::Http {
        method: "GET".into(),
        url: format!("http://{authority}/"),
        headers: HeaderSet::new(),
    });
    let (established, failed) = wait_finished(&mut opened.events).await;

    assert!(!established);
    assert!(failed);
    assert_eq!(frames(&opened.transport), vec![IncomingFrame::Error]);
}
