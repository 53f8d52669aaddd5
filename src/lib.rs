//! throughway — a two-sided forwarding proxy that bypasses network
//! restrictions by splitting traffic between a local client and a
//! remote relay over a mutually-authenticated TLS tunnel.
//!
//! Local applications address the client as an HTTP/HTTPS proxy or a
//! SOCKS5 proxy; the client decides, per destination, whether to reject
//! the request, dial it directly, or forward it through one of several
//! configured relays. The relay accepts authenticated tunnel connections
//! and performs the final dial to the requested destination.
//!
//! ```text
//!   local app -> [http/socks5 front] -> [rule engine] -> [forward registry]
//!                                                              |
//!                                         reject / direct / pool.get -> tunnel
//!                                                              |
//!                                                     mutual-TLS relay -> origin
//! ```
//!
//! The two binaries (`throughway-client`, `throughway-relay`) share this
//! library and one YAML configuration file; each reads only the section
//! relevant to its role.

pub mod config;
pub mod error;
pub mod inbound;
pub mod logging;
pub mod meta;
pub mod pool;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod rule;
pub mod splice;
pub mod stream_mux;
pub mod tls;

pub use config::Config;
pub use error::{Error, Result};
pub use relay::RelayApp;

use std::sync::Arc;

use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use inbound::{Dispatch, HttpListener, InboundListener, Socks5Listener};
use registry::{ForwardRegistry, RawTunnel, StreamTunnel, Transport};
use resolver::ResolverManager;
use rule::RuleEngine;

/// Owns the client-side machinery: the resolver manager, rule engine,
/// forward registry (one entry per configured relay, plus the two
/// synthetic transports), and whichever inbound fronts are configured.
/// Construction order mirrors the data flow in §2 of the specification:
/// resolver -> rules -> registry -> fronts.
pub struct ClientApp {
    dispatch: Arc<Dispatch>,
    listeners: Vec<Arc<dyn InboundListener>>,
}

impl ClientApp {
    /// Builds every component named in the client config section. The
    /// forward registry's pools and stream-tunnel channels are rooted at
    /// `cancel`, the same token `run` later selects on for shutdown.
    pub fn new(config: &Config, cancel: CancellationToken) -> Result<Self> {
        config.validate_client()?;
        let client = &config.client;

        let resolver = ResolverManager::new(&client.resolvers, client.geoip_database.as_deref())?;
        resolver.spawn_sweeper(cancel.clone());

        let known_upstreams: Vec<String> = client.servers.iter().map(|s| s.name.clone()).collect();
        let rules = RuleEngine::parse(&client.rules, &known_upstreams)?;

        let mut builder = ForwardRegistry::builder();
        for server in &client.servers {
            let tls_config = tls::client_tls_config(
                &client.crt_file,
                &client.private_key,
                client.ca_file.as_deref(),
                client.insecure,
            )?;
            let connector = TlsConnector::from(tls_config);
            let sni = pool::server_name_from_addr(&server.addr)?;

            let transport: Arc<dyn Transport> = match server.transport {
                config::TransportKind::Raw => {
                    let pool = pool::Pool::new(connector, server.addr.clone(), sni, client.pool_size);
                    Arc::new(RawTunnel::new(server.name.clone(), pool))
                }
                config::TransportKind::Stream => StreamTunnel::new(
                    server.name.clone(),
                    server.addr.clone(),
                    connector,
                    sni,
                    client.pool_size,
                    cancel.clone(),
                ),
            };
            builder = builder.insert(server.name.clone(), transport);
        }
        let registry = builder.build();

        let dispatch = Arc::new(Dispatch {
            rules,
            resolver,
            registry,
        });

        let mut listeners: Vec<Arc<dyn InboundListener>> = Vec::new();
        if !client.http_addr.is_empty() {
            listeners.push(Arc::new(HttpListener::new(client.http_addr.clone(), dispatch.clone())));
        }
        if !client.socks_addr.is_empty() {
            listeners.push(Arc::new(Socks5Listener::new(client.socks_addr.clone(), dispatch.clone())));
        }

        Ok(ClientApp { dispatch, listeners })
    }

    /// Runs every configured front until `cancel` fires, then closes the
    /// forward registry's transports (draining pools) before returning.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut handles = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            let listener = listener.clone();
            let name = listener.name().to_string();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = listener.start(cancel).await {
                    warn!(listener = %name, error = %e, "inbound listener exited with error");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        self.dispatch.registry.close_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_client_config() -> Config {
        let yaml = r#"
common:
  env: dev
client:
  httpAddr: "127.0.0.1:0"
  privateKey: "does-not-need-to-exist.key"
  crtFile: "does-not-need-to-exist.crt"
  rules:
    - "match-all, direct"
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn client_app_builds_with_only_direct_and_reject() {
        let config = minimal_client_config();
        let cancel = CancellationToken::new();
        // No relays configured and every rule resolves to a synthetic
        // transport, so construction never needs to load TLS material.
        let app = ClientApp::new(&config, cancel);
        assert!(app.is_ok());
    }
}
