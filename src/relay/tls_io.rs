//! Thin wrapper giving a `tokio_rustls` server stream the `Connected`
//! impl tonic's `Server::serve_with_incoming*` requires, since we
//! terminate TLS ourselves (see the module doc in `relay::mod`) instead
//! of using tonic's own TLS feature.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tonic::transport::server::Connected;

pin_project! {
    pub struct TlsIo {
        #[pin]
        inner: TlsStream<TcpStream>,
        peer_addr: SocketAddr,
    }
}

impl TlsIo {
    pub fn new(inner: TlsStream<TcpStream>, peer_addr: SocketAddr) -> Self {
        TlsIo { inner, peer_addr }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PeerAddr(pub SocketAddr);

impl Connected for TlsIo {
    type ConnectInfo = PeerAddr;

    fn connect_info(&self) -> Self::ConnectInfo {
        PeerAddr(self.peer_addr)
    }
}

impl AsyncRead for TlsIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
