//! Relay binary wiring: owns the mutual-TLS acceptor(s) named by the
//! relay's config section and runs whichever listener(s) are configured
//! (C9's raw-tunnel accept-read-dial-splice loop, C10's stream-tunnel
//! RPC service) until the shared cancellation token fires.
//!
//! Both listeners terminate TLS themselves with the same
//! [`crate::tls::server_tls_config`] context rather than leaning on
//! tonic's own TLS feature: the stream listener hands already-TLS-wrapped
//! connections to `Server::serve_with_incoming`, which keeps exactly one
//! TLS setup path shared between C9 and C10.

mod raw;
mod stream;
mod tls_io;

pub use stream::TunnelService;

use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::stream_mux::pb::tunnel_server::TunnelServer;
use crate::tls;
use tls_io::TlsIo;

/// Owns the relay's configuration; `run` starts the listeners named by
/// `server.tcpAddr` (raw tunnel) / `server.grpcAddr` (stream tunnel).
/// At least one must be configured, enforced by `Config::validate_relay`.
pub struct RelayApp {
    config: Config,
}

impl RelayApp {
    pub fn new(config: Config) -> Result<Self> {
        config.validate_relay()?;
        Ok(RelayApp { config })
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let server = &self.config.server;
        let tls_config = tls::server_tls_config(
            &server.crt_file,
            &server.private_key,
            server.ca_file.as_deref(),
        )?;

        let mut handles = Vec::new();

        if let Some(addr) = server.tcp_addr.clone() {
            let acceptor = TlsAcceptor::from(tls_config.clone());
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = raw::serve(&addr, acceptor, cancel).await {
                    warn!(error = %e, "raw tunnel listener exited with error");
                }
            }));
        }

        if let Some(addr) = server.grpc_addr.clone() {
            let acceptor = TlsAcceptor::from(tls_config.clone());
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| Error::listen(format!("stream tunnel {}: {}", addr, e)))?;
            info!(%addr, "stream tunnel listener started");

            let incoming = TcpListenerStream::new(listener).filter_map(move |conn| {
                let acceptor = acceptor.clone();
                async move {
                    match conn {
                        Ok(tcp) => {
                            tcp.set_nodelay(true).ok();
                            let peer_addr = tcp.peer_addr().ok()?;
                            match acceptor.accept(tcp).await {
                                Ok(tls) => Some(Ok::<_, std::io::Error>(TlsIo::new(tls, peer_addr))),
                                Err(e) => {
                                    warn!(error = %e, "stream tunnel TLS handshake failed");
                                    None
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "stream tunnel accept error");
                            None
                        }
                    }
                }
            });

            let shutdown_signal = cancel.clone();
            handles.push(tokio::spawn(async move {
                let result = Server::builder()
                    .add_service(TunnelServer::new(TunnelService::default()))
                    .serve_with_incoming_shutdown(incoming, async move {
                        shutdown_signal.cancelled().await
                    })
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "stream tunnel server exited with error");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("relay stopped");
        Ok(())
    }
}
