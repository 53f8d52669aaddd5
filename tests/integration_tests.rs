//! End-to-end scenarios for the client-side dispatch path (§8): a real
//! HTTP or SOCKS5 front, the rule engine, and the "reject"/"direct"
//! synthetic transports, driven over real loopback sockets. The relay
//! and raw/stream tunnel transports need certificates and are exercised
//! by their own module tests instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use throughway::inbound::{Dispatch, HttpListener, InboundListener, Socks5Listener};
use throughway::registry::ForwardRegistry;
use throughway::resolver::ResolverManager;
use throughway::rule::RuleEngine;

fn dispatch(rules: &[&str]) -> Arc<Dispatch> {
    let rules: Vec<String> = rules.iter().map(|s| s.to_string()).collect();
    let engine = RuleEngine::parse(&rules, &[]).unwrap();
    let resolver = ResolverManager::new(&[], None).unwrap();
    let registry = ForwardRegistry::builder().build();
    Arc::new(Dispatch {
        rules: engine,
        resolver,
        registry,
    })
}

/// Reserves an ephemeral loopback port and hands back its address as a
/// string, for listeners (like ours) that only take an address to bind.
async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// A minimal origin server: reads a request head, replies `200 OK`
/// with a short fixed body, then closes its write half so a splicing
/// transport's remote-to-client copy can observe EOF and finish.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn http_front_direct_proxies_plain_request_to_origin() {
    let origin = spawn_echo_server().await;
    let http_addr = free_addr().await;
    let listener = HttpListener::new(http_addr.clone(), dispatch(&["match-all, direct"]));
    let cancel = CancellationToken::new();
    tokio::spawn(async move { listener.start(cancel).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&http_addr).await.unwrap();
    let request = format!("GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\n\r\n", addr = origin);
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"), "got: {text}");
    assert!(text.ends_with("ok"));
}

#[tokio::test]
async fn http_front_connect_reject_sends_200_then_reject_body() {
    let http_addr = free_addr().await;
    let listener = HttpListener::new(
        http_addr.clone(),
        dispatch(&["host-suffix:ad.example, reject"]),
    );
    let cancel = CancellationToken::new();
    tokio::spawn(async move { listener.start(cancel).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&http_addr).await.unwrap();
    client
        .write_all(b"CONNECT www.ad.example:443 HTTP/1.1\r\nHost: www.ad.example:443\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.0 200 Connection established"), "got: {text}");
    assert!(text.ends_with("reject"));
}

#[tokio::test]
async fn http_front_connect_unmatched_rule_returns_503() {
    let http_addr = free_addr().await;
    let listener = HttpListener::new(
        http_addr.clone(),
        dispatch(&["host-suffix:only-this.example, direct"]),
    );
    let cancel = CancellationToken::new();
    tokio::spawn(async move { listener.start(cancel).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&http_addr).await.unwrap();
    client
        .write_all(b"CONNECT other.example:443 HTTP/1.1\r\nHost: other.example:443\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 503"));
}

#[tokio::test]
async fn http_front_plain_reject_returns_403() {
    let http_addr = free_addr().await;
    let listener = HttpListener::new(http_addr.clone(), dispatch(&["host-suffix:ad.example, reject"]));
    let cancel = CancellationToken::new();
    tokio::spawn(async move { listener.start(cancel).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&http_addr).await.unwrap();
    client
        .write_all(b"GET http://ad.example/ HTTP/1.1\r\nHost: ad.example\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 403 Forbidden"), "got: {text}");
    assert!(text.ends_with("reject"));
}

#[tokio::test]
async fn socks5_front_connect_reaches_origin_directly() {
    let origin = spawn_echo_server().await;
    let socks_addr = free_addr().await;
    let listener = Socks5Listener::new(socks_addr.clone(), dispatch(&["match-all, direct"]));
    let cancel = CancellationToken::new();
    tokio::spawn(async move { listener.start(cancel).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();
    assert_eq!(greeting_reply, [0x05, 0x00]);

    let ip_octets = match origin.ip() {
        std::net::IpAddr::V4(v4) => v4.octets(),
        std::net::IpAddr::V6(_) => panic!("expected an IPv4 loopback origin"),
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&ip_octets);
    request.extend_from_slice(&origin.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00, "expected SOCKS5 success status");

    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn socks5_front_unmatched_rule_replies_general_failure() {
    let socks_addr = free_addr().await;
    let listener = Socks5Listener::new(
        socks_addr.clone(),
        dispatch(&["host-suffix:only-this.example, direct"]),
    );
    let cancel = CancellationToken::new();
    tokio::spawn(async move { listener.start(cancel).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();

    // 93.184.216.34 is unroutable under the configured rule (doesn't
    // match "only-this.example") so the front should reply failure
    // without ever dialing anywhere.
    let request = [0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0x01, 0xbb];
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x01, "expected SOCKS5 general failure status");
}
