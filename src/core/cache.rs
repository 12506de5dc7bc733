//! Short-lived TTL cache for composed metrics views.
//!
//! Entries are grouped per tenant so every write for a tenant can drop that
//! tenant's entries in one sweep. Each invalidation bumps the tenant's
//! generation; a value computed under an older generation is never stored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Hit/miss counters and current size
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    /// hits / (hits + misses), 0.0 before any lookup
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, size: u64) -> Self {
        let hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };
        Self {
            hits,
            misses,
            size,
            hit_rate,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One tenant's entries plus the count of invalidations seen so far
#[derive(Debug, Default)]
struct TenantEntries {
    generation: u64,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Default)]
pub struct TtlCache {
    data: RwLock<HashMap<String, TenantEntries>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of one view within a tenant's entries
    pub fn view_key(kind: &str, qualifier: impl std::fmt::Display) -> String {
        format!("{}:{}", kind, qualifier)
    }

    /// Current invalidation generation for a tenant
    pub async fn generation(&self, tenant_id: &str) -> u64 {
        self.data
            .read()
            .await
            .get(tenant_id)
            .map(|t| t.generation)
            .unwrap_or(0)
    }

    /// Fetch and decode a live entry; expired or undecodable entries miss
    pub async fn get<T: DeserializeOwned>(&self, tenant_id: &str, view: &str) -> Option<T> {
        let now = Utc::now();
        let data = self.data.read().await;

        let live = data
            .get(tenant_id)
            .and_then(|t| t.entries.get(view))
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| serde_json::from_value(entry.value.clone()).ok());
        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Store a value computed at `generation`; dropped (returns false) when
    /// the tenant was invalidated since
    pub async fn set<T: Serialize>(
        &self,
        tenant_id: &str,
        view: &str,
        generation: u64,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let Ok(value) = serde_json::to_value(value) else {
            return false;
        };
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut data = self.data.write().await;
        let tenant = data.entry(tenant_id.to_string()).or_default();
        if tenant.generation != generation {
            debug!(tenant = %tenant_id, view, "Discarding value computed before invalidation");
            return false;
        }
        tenant
            .entries
            .insert(view.to_string(), CacheEntry { value, expires_at });
        true
    }

    /// Cached value for a view, computing and storing it on a miss
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        tenant_id: &str,
        view: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(tenant_id, view).await {
            return Ok(cached);
        }
        let generation = self.generation(tenant_id).await;
        let value = compute().await?;
        self.set(tenant_id, view, generation, &value, ttl).await;
        Ok(value)
    }

    /// Drop every entry belonging to `tenant_id` and reject values computed
    /// before this call
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        let mut data = self.data.write().await;
        let tenant = data.entry(tenant_id.to_string()).or_default();
        tenant.generation += 1;
        let removed = tenant.entries.len();
        tenant.entries.clear();
        if removed > 0 {
            debug!(tenant = %tenant_id, removed, "Invalidated cached metrics");
        }
        removed
    }

    pub async fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut data = self.data.write().await;
        for tenant in data.values_mut() {
            tenant.entries.retain(|_, entry| !entry.is_expired(now));
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let size = self
            .data
            .read()
            .await
            .values()
            .map(|t| t.entries.len() as u64)
            .sum();
        CacheStats::new(
            self.hits.load(Ordering::SeqCst),
            self.misses.load(Ordering::SeqCst),
            size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_hit_and_miss_counting() {
        let cache = TtlCache::new();
        let view = TtlCache::view_key("metrics", 7);

        assert_eq!(cache.get::<u32>("t1", &view).await, None);
        assert!(cache.set("t1", &view, 0, &42u32, TTL).await);
        assert_eq!(cache.get::<u32>("t1", &view).await, Some(42));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let cache = TtlCache::new();
        cache.set("t1", "metrics:1", 0, &1u32, Duration::ZERO).await;
        assert_eq!(cache.get::<u32>("t1", "metrics:1").await, None);

        cache.cleanup_expired().await;
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_invalidation_is_per_tenant() {
        let cache = TtlCache::new();
        cache.set("t1", "metrics:7", 0, &1u32, TTL).await;
        cache.set("t1", "dashboard:7", 0, &2u32, TTL).await;
        cache.set("t10", "metrics:7", 0, &3u32, TTL).await;
        cache.set("t1:x", "metrics:7", 0, &4u32, TTL).await;

        assert_eq!(cache.invalidate_tenant("t1").await, 2);
        assert_eq!(cache.get::<u32>("t10", "metrics:7").await, Some(3));
        assert_eq!(cache.get::<u32>("t1:x", "metrics:7").await, Some(4));
    }

    #[tokio::test]
    async fn test_tenant_ids_with_separators_stay_isolated() {
        let cache = TtlCache::new();
        cache.set("acme", "metrics:7", 0, &1u32, TTL).await;
        cache.set("acme:eu", "metrics:7", 0, &2u32, TTL).await;

        assert_eq!(cache.invalidate_tenant("acme:eu").await, 1);
        assert_eq!(cache.get::<u32>("acme", "metrics:7").await, Some(1));
    }

    #[tokio::test]
    async fn test_value_computed_before_invalidation_is_discarded() {
        let cache = TtlCache::new();
        let generation = cache.generation("t1").await;
        cache.invalidate_tenant("t1").await;

        assert!(!cache.set("t1", "metrics:7", generation, &1u32, TTL).await);
        assert_eq!(cache.get::<u32>("t1", "metrics:7").await, None);
    }

    #[tokio::test]
    async fn test_write_during_compute_is_not_masked() {
        let cache = TtlCache::new();

        let value = cache
            .get_or_compute("t1", "metrics:7", TTL, || async {
                // A write lands while the value is being computed
                cache.invalidate_tenant("t1").await;
                Ok::<u32, ()>(1)
            })
            .await;

        assert_eq!(value, Ok(1));
        assert_eq!(cache.get::<u32>("t1", "metrics:7").await, None);
        assert_eq!(cache.stats().await.size, 0);
    }
}
