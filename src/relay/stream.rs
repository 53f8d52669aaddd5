//! Stream-tunnel relay server (C10): the `Tunnel` RPC service. Each
//! accepted call carries many logical streams multiplexed over one
//! bidirectional frame stream; the first frame on a new stream id must
//! carry meta, which names the origin to dial. Each logical stream then
//! runs through the same [`splice`] primitive C9 uses.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::meta::Net;
use crate::splice::splice;
use crate::stream_mux::pb::tunnel_server::Tunnel;
use crate::stream_mux::pb::Frame;
use crate::stream_mux::{meta_from_pb, Demux};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct TunnelService;

type ForwardStream = Pin<Box<dyn Stream<Item = Result<Frame, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl Tunnel for TunnelService {
    type ForwardStream = ForwardStream;

    async fn forward(
        &self,
        request: Request<Streaming<Frame>>,
    ) -> Result<Response<Self::ForwardStream>, Status> {
        let mut inbound = request.into_inner();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let demux = Demux::new(outbound_tx);

        tokio::spawn(async move {
            loop {
                let frame = match inbound.message().await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "stream tunnel inbound error");
                        return;
                    }
                };

                let Some(unrouted) = demux.dispatch(frame) else {
                    continue; // routed to an already-open logical stream
                };

                let Some(meta) = unrouted.meta.clone() else {
                    warn!(
                        stream_id = unrouted.stream_id,
                        "first frame on new stream carried no meta, dropping"
                    );
                    continue;
                };

                let stream_id = unrouted.stream_id;
                let conn = demux.register(stream_id);
                demux.dispatch(unrouted); // feed the meta frame we already consumed

                tokio::spawn(async move {
                    // `conn`'s `Drop` removes its table entry once this
                    // task finishes, whichever way it finishes.
                    if let Err(e) = serve_logical_stream(conn, &meta_from_pb(&meta)).await {
                        debug!(stream_id, error = %e, "stream tunnel logical stream closed with error");
                    }
                });
            }
        });

        let response_stream = UnboundedReceiverStream::new(outbound_rx).map(Ok);
        Ok(Response::new(Box::pin(response_stream)))
    }
}

async fn serve_logical_stream(
    conn: crate::stream_mux::StreamConn,
    meta: &crate::meta::Meta,
) -> std::io::Result<()> {
    if meta.net != Net::Tcp {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "udp dial not supported (non-goal)",
        ));
    }
    let origin = timeout(DIAL_TIMEOUT, TcpStream::connect(&meta.address))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))??;
    origin.set_nodelay(true).ok();
    splice(conn, origin).await.map(|_| ())
}
