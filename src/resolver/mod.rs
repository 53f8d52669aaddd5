//! Resolver manager (C4): multi-resolver fan-out with singleflight
//! de-duplication, a 30 s TTL cache, and GeoIP country lookup.

mod cache;
mod geoip;
mod singleflight;

pub use cache::ResolveCache;
pub use geoip::GeoIpReader;
pub use singleflight::Singleflight;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ResolverSpec;
use crate::error::{Error, Result};

const FANOUT_DEADLINE: Duration = Duration::from_secs(1);

pub struct ResolverManager {
    resolvers: Vec<TokioAsyncResolver>,
    cache: Arc<ResolveCache>,
    singleflight: Arc<Singleflight>,
    geoip: Arc<GeoIpReader>,
}

impl ResolverManager {
    /// Builds one resolver per configured spec; if none are configured,
    /// the system default is injected so the manager always has
    /// something to query.
    pub fn new(specs: &[ResolverSpec], geoip_database: Option<&str>) -> Result<Arc<Self>> {
        let resolvers = if specs.is_empty() {
            vec![TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| Error::resolve(format!("system resolver: {}", e)))?]
        } else {
            specs
                .iter()
                .map(build_resolver)
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Arc::new(ResolverManager {
            resolvers,
            cache: ResolveCache::new(),
            singleflight: Singleflight::new(),
            geoip: Arc::new(GeoIpReader::load(geoip_database)),
        }))
    }

    /// Spawns the cache's ~1 Hz sweeper, rooted at `cancel`.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) {
        self.cache.spawn_sweeper(cancel);
    }

    /// Cache hit, else singleflight-deduped fan-out race across every
    /// configured resolver under a shared 1 s deadline. Caches a
    /// successful answer; returns `None` on total failure (every
    /// resolver empty/erroring, or the deadline elapsing).
    pub async fn lookup(&self, host: &str) -> Option<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }

        if let Some(ip) = self.cache.get(host) {
            return Some(ip);
        }

        let resolvers = &self.resolvers;
        let result = self
            .singleflight
            .do_once(host, || Self::fanout(resolvers, host))
            .await
            .ok()
            .flatten();

        if let Some(ip) = result {
            self.cache.put(host.to_string(), ip);
        }
        result
    }

    /// Resolves `host` and consults the GeoIP database; empty string if
    /// the host doesn't resolve or the country is unknown.
    pub async fn country(&self, host: &str) -> String {
        match self.lookup(host).await {
            Some(ip) => self.geoip.country(ip),
            None => String::new(),
        }
    }

    /// Races every resolver's lookup under a shared deadline; first
    /// non-empty answer wins (tie-break: arrival order). Dropping the
    /// unfinished futures when the winner is found or the deadline
    /// elapses is how the losers are "canceled" — nothing further polls
    /// their sockets.
    async fn fanout(resolvers: &[TokioAsyncResolver], host: &str) -> Result<Option<IpAddr>> {
        let host = host.to_string();
        let mut inflight = FuturesUnordered::new();
        for resolver in resolvers {
            let resolver = resolver.clone();
            let host = host.clone();
            inflight.push(async move { resolve_one(&resolver, &host).await });
        }

        let race = async {
            while let Some(outcome) = inflight.next().await {
                if let Ok(Some(ip)) = outcome {
                    return Some(ip);
                }
            }
            None
        };

        match tokio::time::timeout(FANOUT_DEADLINE, race).await {
            Ok(answer) => Ok(answer),
            Err(_) => {
                debug!(%host, "resolver fan-out deadline elapsed");
                Ok(None)
            }
        }
    }
}

async fn resolve_one(resolver: &TokioAsyncResolver, host: &str) -> Result<Option<IpAddr>> {
    match resolver.lookup_ip(host).await {
        Ok(response) => Ok(response.iter().next()),
        Err(_) => Ok(None),
    }
}

fn build_resolver(spec: &ResolverSpec) -> Result<TokioAsyncResolver> {
    let (ns_config, opts) = match spec {
        ResolverSpec::Plain(addr) => {
            let socket_addr = if addr.contains(':') {
                addr.parse()
                    .map_err(|e| Error::config(format!("bad resolver address {}: {}", addr, e)))?
            } else {
                format!("{}:53", addr)
                    .parse()
                    .map_err(|e| Error::config(format!("bad resolver address {}: {}", addr, e)))?
            };
            (
                NameServerConfig {
                    socket_addr,
                    protocol: Protocol::Udp,
                    tls_dns_name: None,
                    trust_negative_responses: true,
                    bind_addr: None,
                    tls_config: None,
                },
                ResolverOpts::default(),
            )
        }
        ResolverSpec::DnsOverTls(host) => {
            let socket_addr = format!("{}:853", host)
                .parse()
                .map_err(|e| Error::config(format!("bad DoT host {}: {}", host, e)))?;
            (
                NameServerConfig {
                    socket_addr,
                    protocol: Protocol::Tls,
                    tls_dns_name: Some(host.clone()),
                    trust_negative_responses: true,
                    bind_addr: None,
                    tls_config: None,
                },
                ResolverOpts::default(),
            )
        }
    };

    let mut config = ResolverConfig::new();
    config.add_name_server(ns_config);
    let mut opts = opts;
    opts.cache_size = 0; // our own cache sits above this
    opts.timeout = FANOUT_DEADLINE;
    Ok(TokioAsyncResolver::tokio(config, opts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literal_bypasses_resolvers() {
        let manager = ResolverManager::new(&[], None).unwrap();
        let ip = manager.lookup("127.0.0.1").await.unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_fanout() {
        let manager = ResolverManager::new(&[], None).unwrap();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        manager.cache.put("cached.example".to_string(), ip);
        assert_eq!(manager.lookup("cached.example").await, Some(ip));
    }

    #[test]
    fn empty_spec_list_builds_system_resolver() {
        assert!(ResolverManager::new(&[], None).is_ok());
    }
}
