//! Resolve cache (§3 ResolveCacheEntry): `{ ip, added_at }`, TTL 30 s,
//! swept by a periodic task rather than evicted lazily on every read so
//! that a quiet cache doesn't accumulate stale entries forever.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    ip: IpAddr,
    added_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.added_at.elapsed() > CACHE_TTL
    }
}

#[derive(Default)]
pub struct ResolveCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResolveCache {
    pub fn new() -> Arc<Self> {
        Arc::new(ResolveCache::default())
    }

    pub fn get(&self, host: &str) -> Option<IpAddr> {
        let entries = self.entries.read();
        let entry = entries.get(host)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.ip)
    }

    pub fn put(&self, host: String, ip: IpAddr) {
        self.entries.write().insert(
            host,
            CacheEntry {
                ip,
                added_at: Instant::now(),
            },
        );
    }

    fn sweep(&self) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "resolve cache sweep evicted expired entries");
        }
    }

    /// Spawns the ~1 Hz sweeper task; terminates when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.sweep(),
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResolveCache::new();
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        cache.put("example.com".into(), ip);
        assert_eq!(cache.get("example.com"), Some(ip));
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let cache = ResolveCache::new();
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        cache.entries.write().insert(
            "old.com".into(),
            CacheEntry {
                ip,
                added_at: Instant::now() - Duration::from_secs(31),
            },
        );
        cache.put("fresh.com".into(), ip);
        cache.sweep();
        assert!(cache.get("old.com").is_none());
        assert_eq!(cache.get("fresh.com"), Some(ip));
    }
}
