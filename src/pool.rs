//! Connection pool (C3): an elastic, bounded pool of pre-dialed TLS
//! tunnels to one relay, scaled by observed demand rather than sampled
//! latency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const MAX_PRODUCERS: usize = 20;

pub type PooledConn = TlsStream<TcpStream>;

/// `1 <= producer_count <= MAX_PRODUCERS` at all times, enforced by
/// `add_producer`'s mutex-gated increment.
pub struct Pool {
    addr: String,
    sni: ServerName<'static>,
    connector: TlsConnector,
    capacity: usize,
    tx: mpsc::Sender<PooledConn>,
    rx: Mutex<mpsc::Receiver<PooledConn>>,
    producer_count: Arc<AtomicUsize>,
    cancel: CancellationToken,
    spawn_lock: Mutex<()>,
}

impl Pool {
    /// Starts exactly one producer and returns the pool.
    pub fn new(
        connector: TlsConnector,
        addr: impl Into<String>,
        sni: ServerName<'static>,
        capacity: usize,
    ) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let pool = Arc::new(Pool {
            addr: addr.into(),
            sni,
            connector,
            capacity,
            tx,
            rx: Mutex::new(rx),
            producer_count: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
            spawn_lock: Mutex::new(()),
        });
        pool.spawn_producer();
        pool
    }

    fn spawn_producer(self: &Arc<Self>) {
        self.producer_count.fetch_add(1, Ordering::SeqCst);
        let pool = self.clone();
        tokio::spawn(async move { pool.producer_loop().await });
    }

    /// Bounds producer count to `MAX_PRODUCERS`; a mutex around the
    /// check-and-increment ensures racing callers spawn at most one
    /// extra producer per invocation.
    async fn add_producer(self: &Arc<Self>) {
        let _guard = self.spawn_lock.lock().await;
        if self.producer_count.load(Ordering::SeqCst) >= MAX_PRODUCERS {
            return;
        }
        if self.cancel.is_cancelled() {
            return;
        }
        debug!(relay = %self.addr, "pool scaling up: adding producer");
        self.spawn_producer();
    }

    async fn producer_loop(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                self.producer_count.fetch_sub(1, Ordering::SeqCst);
                return;
            }

            if self.tx.capacity() == 0 {
                // Queue is full; give it a jittered beat, then shrink if
                // it's still full and we're not the last producer.
                let jitter = rand::thread_rng().gen_range(500..=1000);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                if self.tx.capacity() == 0 {
                    let count = self.producer_count.load(Ordering::SeqCst);
                    if count > 1 {
                        self.producer_count.fetch_sub(1, Ordering::SeqCst);
                        debug!(relay = %self.addr, "pool scaling down: producer exiting");
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            match self.dial().await {
                Ok(conn) => {
                    tokio::select! {
                        send_result = self.tx.send(conn) => {
                            if send_result.is_err() {
                                self.producer_count.fetch_sub(1, Ordering::SeqCst);
                                return;
                            }
                        }
                        _ = self.cancel.cancelled() => {
                            self.producer_count.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(relay = %self.addr, error = %e, "pool dial failed, backing off");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            }
        }
    }

    async fn dial(&self) -> Result<PooledConn> {
        let tcp = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::dial(format!("{}: {}", self.addr, e)))?;
        tcp.set_nodelay(true).ok();
        let tls = self
            .connector
            .connect(self.sni.clone(), tcp)
            .await
            .map_err(|e| Error::tls(e.to_string()))?;
        Ok(tls)
    }

    /// Returns the next warm tunnel, or `Timeout` / `Closed`. On deadline,
    /// schedules an extra producer before failing.
    pub async fn get(self: &Arc<Self>, deadline: Duration) -> Result<PooledConn> {
        let mut rx = self.rx.lock().await;
        let queue_before = self.tx.capacity();
        match timeout(deadline, rx.recv()).await {
            Ok(Some(conn)) => {
                drop(rx);
                let queue_len = self.capacity - self.tx.capacity();
                if queue_len <= self.capacity / 3 {
                    self.add_producer().await;
                }
                Ok(conn)
            }
            Ok(None) => Err(Error::PoolClosed),
            Err(_) => {
                let _ = queue_before;
                drop(rx);
                self.add_producer().await;
                Err(Error::PoolTimeout)
            }
        }
    }

    /// Cancels the root context, drains and closes whatever is left in
    /// the channel, and returns once producers have had a chance to
    /// observe cancellation. The pool itself is the sole closer of the
    /// channel: producers simply exit on cancel (see design note in
    /// SPEC_FULL §9).
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok(conn) = rx.try_recv() {
            drop(conn);
        }
        info!(relay = %self.addr, "pool closed");
    }

    pub fn producer_count(&self) -> usize {
        self.producer_count.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

pub fn server_name_from_addr(addr: &str) -> Result<ServerName<'static>> {
    let host = addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(addr);
    ServerName::try_from(host.to_string()).map_err(|e| Error::tls(format!("bad SNI host: {}", e)))
}
