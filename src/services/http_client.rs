//! Shared outbound HTTP client with cached DNS resolution.
//!
//! One `reqwest::Client` serves both forward and mirror traffic. Name
//! resolution goes through an in-process cache that a background task
//! refreshes every five minutes; names that stop resolving are dropped from
//! the cache so the next request retries a fresh lookup.

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const POOL_MAX_IDLE_PER_HOST: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DNS_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// DNS cache shared between the client's connector and the refresh task.
///
/// Lookups populate the cache on first use; the connector then tries the
/// cached addresses in order until one connects.
#[derive(Clone, Default)]
pub struct CachingDnsResolver {
    cache: Arc<RwLock<HashMap<String, Vec<SocketAddr>>>>,
}

impl CachingDnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(host: &str) -> std::io::Result<Vec<SocketAddr>> {
        // Port 0 placeholder; the connector substitutes the real port.
        let addrs = tokio::net::lookup_host((host, 0)).await?.collect();
        Ok(addrs)
    }

    /// Resolve through the cache, falling back to a live lookup on miss.
    pub async fn resolve_cached(&self, host: &str) -> std::io::Result<Vec<SocketAddr>> {
        if let Some(addrs) = self.cache.read().await.get(host) {
            return Ok(addrs.clone());
        }

        let addrs = Self::lookup(host).await?;
        self.cache
            .write()
            .await
            .insert(host.to_string(), addrs.clone());
        debug!("cached DNS entry for {host} ({} addresses)", addrs.len());
        Ok(addrs)
    }

    /// Re-resolve every cached name. Names that fail are evicted so the next
    /// request performs a fresh lookup instead of reusing stale addresses.
    pub async fn refresh(&self) {
        let hosts: Vec<String> = self.cache.read().await.keys().cloned().collect();
        for host in hosts {
            match Self::lookup(&host).await {
                Ok(addrs) => {
                    self.cache.write().await.insert(host, addrs);
                }
                Err(err) => {
                    warn!("dropping DNS cache entry for {host}: {err}");
                    self.cache.write().await.remove(&host);
                }
            }
        }
    }

    /// Spawn the background refresh loop. Runs for the process lifetime.
    pub fn spawn_refresh_task(&self) {
        let resolver = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DNS_REFRESH_INTERVAL);
            // The first tick fires immediately; the cache is empty then.
            interval.tick().await;
            loop {
                interval.tick().await;
                resolver.refresh().await;
            }
        });
    }
}

impl Resolve for CachingDnsResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let addrs = resolver.resolve_cached(name.as_str()).await?;
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Build the process-wide outbound client: 60 s request timeout, bounded
/// idle pool, cached DNS, TLS verification on, HTTP/2 when the peer
/// advertises it via ALPN.
pub fn build_client(resolver: CachingDnsResolver) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .dns_resolver(Arc::new(resolver))
        .build()
}
