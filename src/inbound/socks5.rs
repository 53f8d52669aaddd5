//! SOCKS5 front (C8): the greeting + request state machine from
//! RFC 1928, minus authentication sub-negotiation (Non-goal — no SOCKS
//! front-door auth) and minus BIND/UDP ASSOCIATE (Non-goals).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Dispatch, InboundListener};
use crate::error::{Error, Result};
use crate::meta::Meta;

const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const STATUS_OK: u8 = 0x00;
const STATUS_GENERAL_FAILURE: u8 = 0x01;
const STATUS_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const STATUS_ATYP_NOT_SUPPORTED: u8 = 0x08;

pub struct Socks5Listener {
    addr: String,
    dispatch: Arc<Dispatch>,
}

impl Socks5Listener {
    pub fn new(addr: impl Into<String>, dispatch: Arc<Dispatch>) -> Self {
        Socks5Listener {
            addr: addr.into(),
            dispatch,
        }
    }
}

#[async_trait::async_trait]
impl InboundListener for Socks5Listener {
    fn name(&self) -> &str {
        "socks5"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| Error::listen(format!("socks5 {}: {}", self.addr, e)))?;
        info!(addr = %self.addr, "socks5 proxy listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "socks5 accept error");
                            continue;
                        }
                    };
                    let dispatch = self.dispatch.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatch).await {
                            debug!(%peer, error = %e, "socks5 connection error");
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    info!("socks5 listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, dispatch: Arc<Dispatch>) -> Result<()> {
    greet(&mut stream).await?;
    let address = read_request(&mut stream).await?;
    let local = stream
        .local_addr()
        .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let transport = dispatch.route(&address).await;
    let status = if transport.is_some() {
        STATUS_OK
    } else {
        STATUS_GENERAL_FAILURE
    };
    write_reply(&mut stream, status, local).await?;

    match transport {
        Some(transport) => {
            let meta = Meta::tcp(address);
            transport.connect(Box::new(stream), meta).await
        }
        None => Ok(()),
    }
}

async fn greet(stream: &mut TcpStream) -> Result<()> {
    let version = stream.read_u8().await?;
    if version != VERSION {
        return Err(Error::protocol(format!("bad SOCKS version: {}", version)));
    }
    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;
    // No-auth only (Non-goal: no SOCKS front-door auth).
    stream.write_all(&[VERSION, 0x00]).await?;
    Ok(())
}

async fn read_request(stream: &mut TcpStream) -> Result<String> {
    let version = stream.read_u8().await?;
    if version != VERSION {
        return Err(Error::protocol(format!("bad SOCKS version: {}", version)));
    }
    let cmd = stream.read_u8().await?;
    let _rsv = stream.read_u8().await?;
    let atyp = stream.read_u8().await?;

    if cmd != CMD_CONNECT {
        write_reply(
            stream,
            STATUS_COMMAND_NOT_SUPPORTED,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        )
        .await?;
        return Err(Error::protocol(format!("unsupported SOCKS command: {}", cmd)));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            Ipv4Addr::from(buf).to_string()
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            format!("[{}]", std::net::Ipv6Addr::from(buf))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            String::from_utf8(buf).map_err(|_| Error::protocol("domain is not utf-8"))?
        }
        other => {
            write_reply(
                stream,
                STATUS_ATYP_NOT_SUPPORTED,
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            )
            .await?;
            return Err(Error::protocol(format!("unsupported ATYP: {}", other)));
        }
    };

    let port = stream.read_u16().await?;
    Ok(format!("{}:{}", host, port))
}

async fn write_reply(stream: &mut TcpStream, status: u8, bound: SocketAddr) -> Result<()> {
    let mut reply = vec![VERSION, status, 0x00];
    match bound.ip() {
        IpAddr::V4(ip) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&ip.octets());
        }
    }
    reply.extend_from_slice(&bound.port().to_be_bytes());
    stream.write_all(&reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn greeting_replies_no_auth() {
        let (mut client, mut server) = loopback_pair().await;
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        greet(&mut server).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn connect_request_ipv4_parses_to_host_port() {
        let (mut client, mut server) = loopback_pair().await;
        client
            .write_all(&[0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let address = read_request(&mut server).await.unwrap();
        assert_eq!(address, "127.0.0.1:80");
    }

    #[tokio::test]
    async fn connect_request_domain_with_max_length_parses() {
        let (mut client, mut server) = loopback_pair().await;
        let domain = "a".repeat(255);
        let mut req = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 255];
        req.extend_from_slice(domain.as_bytes());
        req.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&req).await.unwrap();
        let address = read_request(&mut server).await.unwrap();
        assert_eq!(address, format!("{}:443", domain));
    }

    #[tokio::test]
    async fn connect_request_ipv6_brackets_the_host() {
        let (mut client, mut server) = loopback_pair().await;
        let mut req = vec![0x05, CMD_CONNECT, 0x00, ATYP_IPV6];
        req.extend_from_slice(&std::net::Ipv6Addr::LOCALHOST.octets());
        req.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&req).await.unwrap();
        let address = read_request(&mut server).await.unwrap();
        assert_eq!(address, "[::1]:443");
        // Bracketed form parses as a single unambiguous socket address.
        assert!(address.parse::<SocketAddr>().is_ok());
    }

    #[tokio::test]
    async fn unsupported_command_is_rejected() {
        let (mut client, mut server) = loopback_pair().await;
        client
            .write_all(&[0x05, 0x02, 0x00, ATYP_IPV4, 1, 2, 3, 4, 0x00, 0x50])
            .await
            .unwrap();
        let err = read_request(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], STATUS_COMMAND_NOT_SUPPORTED);
    }

    #[test]
    fn ipv4_atyp_constant_matches_rfc() {
        assert_eq!(ATYP_IPV4, 0x01);
        assert_eq!(ATYP_DOMAIN, 0x03);
        assert_eq!(ATYP_IPV6, 0x04);
    }
}
