//! HTTP proxy front (C7). A minimal hand-rolled request-line/header
//! parser stands in for a full HTTP server stack: the transport layer
//! needs exclusive ownership of the raw client socket so it can splice
//! it against whatever gets dialed, which a framework server wouldn't
//! hand back without a hijack API. `tokio::io::BufReader` is the
//! "hijacked" handle — reading it line-by-line for the request head
//! leaves any already-buffered body bytes in place for the splice that
//! follows, instead of discarding them.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Dispatch, InboundListener};
use crate::error::{Error, Result};
use crate::meta::Meta;

/// Headers stripped from every forwarded request (§6 "Proxy-header
/// stripping"). `Connection` is dropped outright rather than rewritten,
/// which also satisfies "if Connection: close, do not propagate close".
const STRIPPED_HEADERS: &[&str] = &[
    "accept-encoding",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "connection",
];

pub struct HttpListener {
    addr: String,
    dispatch: Arc<Dispatch>,
}

impl HttpListener {
    pub fn new(addr: impl Into<String>, dispatch: Arc<Dispatch>) -> Self {
        HttpListener {
            addr: addr.into(),
            dispatch,
        }
    }
}

#[async_trait::async_trait]
impl InboundListener for HttpListener {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| Error::listen(format!("http {}: {}", self.addr, e)))?;
        info!(addr = %self.addr, "http proxy listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "http accept error");
                            continue;
                        }
                    };
                    let dispatch = self.dispatch.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatch).await {
                            debug!(%peer, error = %e, "http connection error");
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    info!("http listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, dispatch: Arc<Dispatch>) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let n = reader.read_line(&mut request_line).await?;
    if n == 0 {
        return Ok(()); // client closed before sending anything
    }
    let request_line = request_line.trim_end();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| Error::protocol("empty request line"))?;
    let target = parts.next().ok_or_else(|| Error::protocol("missing request target"))?;
    let version = parts.next().unwrap_or("HTTP/1.1");

    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    if method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(reader, target, &dispatch).await
    } else {
        handle_plain(reader, method, target, version, &headers, &dispatch).await
    }
}

async fn handle_connect(
    mut reader: BufReader<tokio::net::TcpStream>,
    target: &str,
    dispatch: &Dispatch,
) -> Result<()> {
    let Some(transport) = dispatch.route(target).await else {
        reader.write_all(b"HTTP/1.1 503 Service Unavailable\r\n\r\n").await?;
        return Ok(());
    };

    reader
        .write_all(b"HTTP/1.0 200 Connection established\r\n\r\n")
        .await?;
    let meta = Meta::tcp(target.to_string());
    transport.connect(Box::new(reader), meta).await
}

async fn handle_plain(
    mut reader: BufReader<tokio::net::TcpStream>,
    method: &str,
    target: &str,
    version: &str,
    headers: &[(String, String)],
    dispatch: &Dispatch,
) -> Result<()> {
    let Some(rest) = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    else {
        reader
            .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\nabsolute-URI required")
            .await?;
        return Ok(());
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let host_port = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{}:80", authority)
    };

    let Some(transport) = dispatch.route(&host_port).await else {
        reader.write_all(b"HTTP/1.1 503 Service Unavailable\r\n\r\n").await?;
        return Ok(());
    };

    let mut request_bytes = format!("{} {} {}\r\n", method, path, version).into_bytes();
    for (name, value) in headers {
        if STRIPPED_HEADERS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        request_bytes.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    request_bytes.extend_from_slice(b"\r\n");

    let meta = Meta::tcp(host_port);
    transport.http(Box::new(reader), meta, request_bytes).await
}
