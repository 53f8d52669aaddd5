//! Stream tunnel framing (C10): the generated protobuf `Frame`/`Meta`
//! types, a logical `StreamConn` carved out of one frame, and a `Demux`
//! that routes frames between many logical streams and the single
//! persistent bidirectional RPC channel they share.
//!
//! Used by both roles: the client's [`crate::registry::stream_tunnel`]
//! dials new logical streams over a pool of persistent channels; the
//! relay's [`crate::relay::stream_server`] accepts one `Demux` per
//! incoming `Forward` call and dispatches each frame to the stream (or
//! origin dial) it belongs to.

pub mod pb {
    tonic::include_proto!("throughway.tunnel");
}

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::meta::{Meta, Net};
use pb::Frame;

pub fn meta_to_pb(meta: &Meta) -> pb::Meta {
    pb::Meta {
        net: meta.net.to_string(),
        address: meta.address.clone(),
    }
}

pub fn meta_from_pb(meta: &pb::Meta) -> Meta {
    let net = if meta.net == "udp" { Net::Udp } else { Net::Tcp };
    Meta {
        net,
        address: meta.address.clone(),
    }
}

/// A logical connection carved out of one shared framed channel. Reads
/// are satisfied from a per-message buffer; once a message is fully
/// consumed, the next one is awaited. Writes are serialized per
/// `StreamConn` by virtue of `&mut self` exclusivity (the multiplexer
/// doesn't need its own write lock — `tokio::io::split`, used by
/// [`crate::splice::splice`], supplies the independent read/write half
/// locking described in the data model).
pub struct StreamConn {
    stream_id: u64,
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<Frame>,
    pending: BytesMut,
    write_closed: bool,
    read_closed: bool,
    demux: Arc<Demux>,
}

impl StreamConn {
    fn new(
        stream_id: u64,
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<Frame>,
        demux: Arc<Demux>,
    ) -> Self {
        StreamConn {
            stream_id,
            outbound,
            inbound,
            pending: BytesMut::new(),
            write_closed: false,
            read_closed: false,
            demux,
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Sends the first frame on this stream: meta, zero-length data.
    pub fn send_meta(&self, meta: &Meta) -> io::Result<()> {
        self.outbound
            .send(Frame {
                stream_id: self.stream_id,
                meta: Some(meta_to_pb(meta)),
                data: Vec::new(),
                close: false,
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))
    }
}

impl Drop for StreamConn {
    /// Removes this stream's entry from the owning `Demux`'s table.
    /// Without this, a stream-tunnel relay's table (client side: one
    /// entry per dialed request; relay side: one per accepted request)
    /// grows unboundedly for the life of the persistent channel.
    fn drop(&mut self) {
        self.demux.remove(self.stream_id);
    }
}

impl AsyncRead for StreamConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.read_closed {
                return Poll::Ready(Ok(()));
            }
            match this.inbound.poll_recv(cx) {
                Poll::Ready(Some(frame)) => {
                    if frame.close {
                        this.read_closed = true;
                        continue;
                    }
                    if frame.data.is_empty() {
                        // Meta-only frame (first frame to the relay);
                        // treat as zero-byte data and wait for more.
                        continue;
                    }
                    this.pending = BytesMut::from(&frame.data[..]);
                }
                Poll::Ready(None) => {
                    this.read_closed = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for StreamConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream write half closed",
            )));
        }
        let frame = Frame {
            stream_id: this.stream_id,
            meta: None,
            data: buf.to_vec(),
            close: false,
        };
        this.outbound
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.write_closed {
            this.write_closed = true;
            let _ = this.outbound.send(Frame {
                stream_id: this.stream_id,
                meta: None,
                data: Vec::new(),
                close: true,
            });
        }
        Poll::Ready(Ok(()))
    }
}

/// Routes frames between many logical `StreamConn`s and the one
/// outbound funnel feeding the shared RPC call.
pub struct Demux {
    next_id: AtomicU64,
    table: Mutex<HashMap<u64, mpsc::UnboundedSender<Frame>>>,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Demux {
    pub fn new(outbound: mpsc::UnboundedSender<Frame>) -> Arc<Self> {
        Arc::new(Demux {
            next_id: AtomicU64::new(1),
            table: Mutex::new(HashMap::new()),
            outbound,
        })
    }

    /// Opens a new logical stream with a fresh id (client role: it
    /// picks the id since it originates the stream).
    pub fn open(self: &Arc<Self>) -> StreamConn {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.register(id)
    }

    /// Registers a stream id the peer originated (relay role: the
    /// client picked the id; the relay just learns it from the first
    /// frame).
    pub fn register(self: &Arc<Self>, stream_id: u64) -> StreamConn {
        let (tx, rx) = mpsc::unbounded_channel();
        self.table.lock().insert(stream_id, tx);
        StreamConn::new(stream_id, self.outbound.clone(), rx, self.clone())
    }

    /// Routes an inbound frame to its stream, if known. Returns the
    /// frame back if the stream id is unknown — the caller (relay)
    /// decides whether that's a new-stream announcement or a protocol
    /// error.
    pub fn dispatch(&self, frame: Frame) -> Option<Frame> {
        let table = self.table.lock();
        match table.get(&frame.stream_id) {
            Some(tx) => {
                let _ = tx.send(frame);
                None
            }
            None => Some(frame),
        }
    }

    pub fn remove(&self, stream_id: u64) {
        self.table.lock().remove(&stream_id);
    }
}
