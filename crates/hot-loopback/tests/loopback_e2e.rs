//! End-to-end tests: a real proxy client, both tunnel halves over a jittered
//! in-memory link, and real upstream servers on localhost.
//!
//! Chunks are tiny and every text is delayed by a random amount, so the
//! envelopes of each response reach the proxy half out of order.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use hot_core::DispatchConfig;
use hot_loopback::{bind_loopback, LoopbackConfig};
use hot_transport::memory::Jitter;

const WAIT: Duration = Duration::from_secs(10);

const PAGE: &str = "The quick brown fox jumps over the lazy dog, several times over.";

async fn start_loopback() -> SocketAddr {
    let config = LoopbackConfig {
        tunnel: DispatchConfig::default().with_chunk_size(8),
        jitter: Jitter::new(Duration::ZERO, Duration::from_millis(30)),
        connect_timeout: Duration::from_secs(2),
    };
    let running = Arc::new(AtomicBool::new(true));
    let (addr, _task) = bind_loopback("127.0.0.1:0".parse().unwrap(), config, running)
        .await
        .unwrap();
    addr
}

/// Serves HTTP/1 on an ephemeral port: `GET` gets [`PAGE`], anything else
/// gets its own body echoed back.
async fn start_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = if req.method() == hyper::Method::GET {
                        Bytes::from_static(PAGE.as_bytes())
                    } else {
                        req.into_body().collect().await.unwrap().to_bytes()
                    };
                    Ok::<_, Infallible>(Response::new(Full::new(body)))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
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
    addr
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = timeout(WAIT, stream.read(&mut byte)).await.unwrap().unwrap();
        assert_eq!(n, 1, "connection closed inside the response head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

async fn proxied(proxy: SocketAddr, request: String) -> String {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn test_get_survives_scrambled_delivery() {
    // Arrange
    let proxy = start_loopback().await;
    let upstream = start_upstream().await;

    // Act
    let response = proxied(
        proxy,
        format!(
            "GET http://{upstream}/page HTTP/1.1\r\nHost: {upstream}\r\nConnection: close\r\n\r\n"
        ),
    )
    .await;

    // Assert
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with(&format!("\r\n\r\n{PAGE}")), "{response}");
}

#[tokio::test]
async fn test_post_body_reaches_upstream_in_order() {
    let proxy = start_loopback().await;
    let upstream = start_upstream().await;
    let body = "0123456789abcdefghijklmnopqrstuvwxyz";

    let response = proxied(
        proxy,
        format!(
            "POST http://{upstream}/echo HTTP/1.1\r\nHost: {upstream}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with(&format!("\r\n\r\n{body}")), "{response}");
}

#[tokio::test]
async fn test_unreachable_upstream_answers_500() {
    // Arrange: a port nobody listens on
    let proxy = start_loopback().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    // Act
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("GET http://{dead}/ HTTP/1.1\r\nHost: {dead}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    // Assert
    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 500 Connection error\r\n"), "{head}");
}

#[tokio::test]
async fn test_connect_tunnel_echoes_through_both_halves() {
    // Arrange
    let proxy = start_loopback().await;
    let echo = start_echo().await;
    let mut client = TcpStream::connect(proxy).await.unwrap();

    // Act
    client
        .write_all(format!("CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    let message = b"a tunnelled message longer than one chunk";
    client.write_all(message).await.unwrap();

    // Assert
    assert!(head.starts_with("HTTP/1.1 200 Connection established\r\n"), "{head}");
    let mut echoed = vec![0u8; message.len()];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, message);
}
