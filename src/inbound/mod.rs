//! Inbound adapters: the HTTP proxy front (C7) and the SOCKS5 front
//! (C8). Both terminate at a shared [`Dispatch`] — rule engine plus
//! forward registry — and hand the accepted connection off to whatever
//! transport the rule engine names.

mod http;
mod socks5;

pub use http::HttpListener;
pub use socks5::Socks5Listener;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::{ForwardRegistry, Transport};
use crate::resolver::ResolverManager;
use crate::rule::RuleEngine;

/// Bundles the rule engine, the resolver it consults, and the registry
/// it names upstreams from. One `Dispatch` is shared by every inbound
/// listener in a client process.
pub struct Dispatch {
    pub rules: RuleEngine,
    pub resolver: Arc<ResolverManager>,
    pub registry: ForwardRegistry,
}

impl Dispatch {
    /// Resolves `host` (possibly `host:port`) to a transport via the
    /// rule engine. `None` means no rule matched — callers turn that
    /// into a 503 (HTTP) or a SOCKS general-failure reply.
    pub async fn route(&self, host: &str) -> Option<Arc<dyn Transport>> {
        let upstream = self.rules.get(host, &self.resolver).await;
        if upstream.is_empty() {
            return None;
        }
        self.registry.get(&upstream)
    }
}

#[async_trait]
pub trait InboundListener: Send + Sync {
    fn name(&self) -> &str;

    /// Accepts connections until `cancel` fires, then returns.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;
}
