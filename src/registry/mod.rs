//! Forward registry (C6): a named map of pluggable transports. Two
//! synthetic entries ("reject", "direct") are always present; one
//! transport is installed per configured relay, keyed by its declared
//! transport kind.

mod direct;
mod raw_tunnel;
mod reject;
mod stream_tunnel;

pub use direct::Direct;
pub use raw_tunnel::RawTunnel;
pub use reject::Reject;
pub use stream_tunnel::StreamTunnel;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::meta::Meta;

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Dynamic transport dispatch: a tagged set of implementations behind
/// one trait object, `O(1)` after the registry's name lookup (§9).
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// CONNECT / SOCKS path: splice `client` with whatever this
    /// transport dials for `meta`.
    async fn connect(&self, client: BoxedStream, meta: Meta) -> Result<()>;

    /// Plain-HTTP path: `request_bytes` is the already header-stripped
    /// request line + headers (+ body, if any) reconstructed by the
    /// HTTP front. It's written to whatever this transport dials, then
    /// the two sides are spliced so the response (and any further
    /// pipelined bytes) flow back untouched.
    async fn http(&self, client: BoxedStream, meta: Meta, request_bytes: Vec<u8>) -> Result<()>;

    /// Releases any per-relay resources held by this transport (e.g.
    /// draining a pool). Default no-op; dial-based transports delegate
    /// to [`Dialer::close`]. Called once per transport during shutdown,
    /// after every inbound listener has stopped accepting.
    async fn close(&self) {}
}

/// Implemented by every "dial a destination, then behave like a plain
/// byte stream" transport (direct, raw tunnel, stream tunnel). Reject
/// is the one transport that isn't shaped this way, since it never
/// dials anything.
#[async_trait]
pub trait Dialer: Send + Sync {
    fn name(&self) -> &str;
    async fn dial(&self, meta: &Meta) -> Result<BoxedStream>;
    async fn close(&self) {}
}

/// Blanket bridge from `Dialer` to `Transport`: dial, then either
/// splice directly (`connect`) or write the reconstructed request
/// first (`http`).
#[async_trait]
impl<D: Dialer> Transport for D {
    fn name(&self) -> &str {
        Dialer::name(self)
    }

    async fn connect(&self, client: BoxedStream, meta: Meta) -> Result<()> {
        let remote = self.dial(&meta).await?;
        crate::splice::splice(client, remote).await.map_err(crate::error::Error::Io)?;
        Ok(())
    }

    async fn http(&self, client: BoxedStream, meta: Meta, request_bytes: Vec<u8>) -> Result<()> {
        let mut remote = self.dial(&meta).await?;
        remote.write_all(&request_bytes).await.map_err(crate::error::Error::Io)?;
        crate::splice::splice(client, remote).await.map_err(crate::error::Error::Io)?;
        Ok(())
    }

    async fn close(&self) {
        Dialer::close(self).await
    }
}

pub struct ForwardRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl ForwardRegistry {
    pub fn builder() -> ForwardRegistryBuilder {
        ForwardRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name).cloned()
    }

    /// Closes every registered transport. Currently meaningful only for
    /// pooled raw tunnels (drains and closes the pool); called once
    /// during shutdown, after listeners have stopped accepting.
    pub async fn close_all(&self) {
        for transport in self.transports.values() {
            transport.close().await;
        }
    }
}

pub struct ForwardRegistryBuilder {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl ForwardRegistryBuilder {
    fn new() -> Self {
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert("reject".to_string(), Arc::new(Reject));
        transports.insert("direct".to_string(), Arc::new(Direct));
        ForwardRegistryBuilder { transports }
    }

    pub fn insert(mut self, name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(name.into(), transport);
        self
    }

    pub fn build(self) -> ForwardRegistry {
        ForwardRegistry {
            transports: self.transports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_and_direct_are_always_present() {
        let registry = ForwardRegistry::builder().build();
        assert!(registry.get("reject").is_some());
        assert!(registry.get("direct").is_some());
        assert!(registry.get("nope").is_none());
    }
}
