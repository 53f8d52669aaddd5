//! Stream-tunnel transport (§4.6, C10): instead of one TLS connection
//! per session, `pool_size` persistent bidirectional RPC channels stay
//! open to the relay; `dial` picks one uniformly at random and carves a
//! new logical [`StreamConn`] out of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Request;
use tower::service_fn;
use tracing::{debug, info, warn};

use super::{BoxedStream, Dialer};
use crate::error::{Error, Result};
use crate::meta::Meta;
use crate::stream_mux::pb::tunnel_client::TunnelClient;
use crate::stream_mux::Demux;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

type Slot = Arc<RwLock<Option<Arc<Demux>>>>;

pub struct StreamTunnel {
    name: String,
    slots: Vec<Slot>,
}

impl StreamTunnel {
    /// Starts `pool_size` persistent channels (each reconnecting on its
    /// own with a 10 s backoff, mirroring the raw pool's producer
    /// back-off) and returns once they're all scheduled — individual
    /// channels come up asynchronously.
    pub fn new(
        name: impl Into<String>,
        addr: String,
        connector: TlsConnector,
        sni: ServerName<'static>,
        pool_size: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let slots: Vec<Slot> = (0..pool_size.max(1))
            .map(|_| Arc::new(RwLock::new(None)))
            .collect();

        for slot in &slots {
            let slot = slot.clone();
            let addr = addr.clone();
            let connector = connector.clone();
            let sni = sni.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { channel_loop(slot, addr, connector, sni, cancel).await });
        }

        Arc::new(StreamTunnel {
            name: name.into(),
            slots,
        })
    }
}

#[async_trait]
impl Dialer for StreamTunnel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dial(&self, meta: &Meta) -> Result<BoxedStream> {
        let idx = rand::thread_rng().gen_range(0..self.slots.len());
        let demux = self.slots[idx]
            .read()
            .clone()
            .ok_or_else(|| Error::dial(format!("{}: no live channel", self.name)))?;
        let conn = demux.open();
        conn.send_meta(meta).map_err(|e| Error::dial(e.to_string()))?;
        Ok(Box::new(conn))
    }
}

async fn channel_loop(
    slot: Slot,
    addr: String,
    connector: TlsConnector,
    sni: ServerName<'static>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match connect_and_serve(&slot, &addr, &connector, &sni, &cancel).await {
            Ok(()) => debug!(%addr, "stream tunnel channel closed cleanly"),
            Err(e) => warn!(%addr, error = %e, "stream tunnel channel failed"),
        }
        *slot.write() = None;
        if cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

async fn connect_and_serve(
    slot: &Slot,
    addr: &str,
    connector: &TlsConnector,
    sni: &ServerName<'static>,
    cancel: &CancellationToken,
) -> Result<()> {
    let channel = dial_channel(addr, connector, sni).await?;
    let mut client = TunnelClient::new(channel);

    let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let request_stream = UnboundedReceiverStream::new(outbound_rx);

    let response = client
        .forward(Request::new(request_stream))
        .await
        .map_err(|e| Error::dial(format!("forward rpc: {}", e)))?;
    let mut inbound = response.into_inner();

    let demux = Demux::new(outbound_tx);
    *slot.write() = Some(demux.clone());
    info!(%addr, "stream tunnel channel established");

    loop {
        tokio::select! {
            frame = inbound.message() => {
                match frame.map_err(|e| Error::protocol(e.to_string()))? {
                    Some(frame) => {
                        if let Some(unrouted) = demux.dispatch(frame) {
                            warn!(stream_id = unrouted.stream_id, "dropping frame for unknown stream id");
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn dial_channel(
    addr: &str,
    connector: &TlsConnector,
    sni: &ServerName<'static>,
) -> Result<Channel> {
    let addr = addr.to_string();
    let connector = connector.clone();
    let sni = sni.clone();

    Endpoint::from_static("https://throughway.tunnel.local")
        .connect_with_connector(service_fn(move |_uri: Uri| {
            let addr = addr.clone();
            let connector = connector.clone();
            let sni = sni.clone();
            async move {
                let tcp = TcpStream::connect(&addr).await?;
                tcp.set_nodelay(true).ok();
                let tls = connector.connect(sni, tcp).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(tls))
            }
        }))
        .await
        .map_err(|e| Error::dial(format!("{}: {}", addr, e)))
}
