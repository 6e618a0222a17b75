//! DNS resolution cache.
//!
//! # Responsibilities
//! - Resolve hostnames once and reuse the answer until invalidated
//! - Bypass lookup entirely for IP literals
//! - Support explicit, whole-cache invalidation

use std::io;
use std::net::IpAddr;

use dashmap::DashMap;
use tokio::net::lookup_host;

/// Hostname-to-address cache with explicit invalidation.
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: DashMap<String, IpAddr>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `host`, consulting the cache first. The port is only used to
    /// satisfy the resolver API; cached entries are keyed by hostname alone.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<IpAddr, io::Error> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        if let Some(hit) = self.entries.get(host) {
            return Ok(*hit);
        }

        let mut addrs = lookup_host((host, port)).await?;
        let addr = addrs.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {host}"),
            )
        })?;

        tracing::debug!(host, ip = %addr.ip(), "dns resolution cached");
        self.entries.insert(host.to_string(), addr.ip());
        Ok(addr.ip())
    }

    /// Drop every cached resolution. Returns how many entries were evicted.
    pub fn clear(&self) -> usize {
        let evicted = self.entries.len();
        self.entries.clear();
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_bypass_lookup_and_cache() {
        let cache = DnsCache::new();
        let ip = cache.resolve("127.0.0.1", 80).await.unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn resolves_and_caches_hostnames() {
        let cache = DnsCache::new();
        let first = cache.resolve("localhost", 80).await.unwrap();
        assert_eq!(cache.len(), 1);

        let second = cache.resolve("localhost", 80).await.unwrap();
        assert_eq!(first, second);

        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
