//! Active-destination cache.
//!
//! Short-TTL, per-tenant cache of active destinations so the dispatch path
//! does not hit the store for every event. Every registry mutation and every
//! executor health update invalidates the tenant's entry; a stale entry is at
//! worst served for the TTL window, which the delivery-time health check
//! tolerates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orvio_db::models::WebhookDestination;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default cache TTL in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
struct CacheEntry {
    destinations: Vec<WebhookDestination>,
    cached_at: Instant,
}

#[derive(Debug)]
struct CacheInner {
    data: HashMap<Uuid, CacheEntry>,
    ttl: Duration,
}

/// Shared handle to the per-tenant active-destination cache.
#[derive(Debug, Clone)]
pub struct DestinationCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl Default for DestinationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationCache {
    /// Create a cache with the default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    /// Create a cache with a custom TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                data: HashMap::new(),
                ttl,
            })),
        }
    }

    /// Fetch a tenant's cached active destinations, if present and fresh.
    pub async fn get(&self, tenant_id: Uuid) -> Option<Vec<WebhookDestination>> {
        let inner = self.inner.read().await;
        inner
            .data
            .get(&tenant_id)
            .filter(|entry| entry.cached_at.elapsed() < inner.ttl)
            .map(|entry| entry.destinations.clone())
    }

    /// Store a tenant's active destinations.
    pub async fn set(&self, tenant_id: Uuid, destinations: Vec<WebhookDestination>) {
        let mut inner = self.inner.write().await;
        inner.data.insert(
            tenant_id,
            CacheEntry {
                destinations,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop a tenant's entry. Safe to call when no entry exists.
    pub async fn invalidate(&self, tenant_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.data.remove(&tenant_id);
    }
}
