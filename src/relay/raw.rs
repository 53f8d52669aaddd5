//! Raw-tunnel relay forwarder (C9): accept TLS, read the meta frame,
//! dial the named destination, splice. Per-connection state machine:
//! `Accepted -> ReadingMeta -> Dialing -> Splicing -> Closed`; any
//! step's failure goes straight to `Closed` without surfacing past this
//! connection (§7: per-connection errors are logged and only close the
//! one connection).

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::meta::{read_meta, Net};
use crate::splice::splice;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn serve(
    addr: &str,
    acceptor: TlsAcceptor,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::listen(format!("raw tunnel {}: {}", addr, e)))?;
    info!(%addr, "raw tunnel listener started");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "raw tunnel accept error");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(tcp, acceptor).await {
                        debug!(%peer, error = %e, "raw tunnel connection closed with error");
                    }
                });
            }
            _ = cancel.cancelled() => {
                info!("raw tunnel listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(tcp: TcpStream, acceptor: TlsAcceptor) -> Result<()> {
    tcp.set_nodelay(true).ok();
    // Accepted -> ReadingMeta
    let mut tls = acceptor
        .accept(tcp)
        .await
        .map_err(|e| Error::tls(e.to_string()))?;
    let meta = read_meta(&mut tls).await?;

    // ReadingMeta -> Dialing
    if meta.net != Net::Tcp {
        return Err(Error::protocol("udp dial not supported (non-goal)"));
    }
    let origin = timeout(DIAL_TIMEOUT, TcpStream::connect(&meta.address))
        .await
        .map_err(|_| Error::dial(format!("{}: dial timed out", meta.address)))?
        .map_err(|e| Error::dial(format!("{}: {}", meta.address, e)))?;
    origin.set_nodelay(true).ok();

    // Dialing -> Splicing -> Closed
    splice(tls, origin).await.map_err(Error::Io)?;
    Ok(())
}
