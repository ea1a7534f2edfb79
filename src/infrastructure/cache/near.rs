//! Process-local near cache
//!
//! Sits in front of the distributed tier for one repository instance.
//! There is no cross-process coherence: another process's write becomes
//! visible here only once the local entry expires or is invalidated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use moka::future::Cache as MokaCache;
use moka::Expiry;

use crate::domain::cache::{CacheEntity, GlobPattern, NearCacheSettings};

#[derive(Debug)]
struct NearEntry<E> {
    entity: Arc<E>,
    ttl: Duration,
    expires_at: Instant,
}

impl<E> Clone for NearEntry<E> {
    fn clone(&self) -> Self {
        Self {
            entity: Arc::clone(&self.entity),
            ttl: self.ttl,
            expires_at: self.expires_at,
        }
    }
}

impl<E> NearEntry<E> {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

struct NearExpiry;

impl<E> Expiry<String, NearEntry<E>> for NearExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &NearEntry<E>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &NearEntry<E>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-process cache of decoded entities
#[derive(Debug, Clone)]
pub struct NearCache<E>
where
    E: CacheEntity,
{
    cache: MokaCache<String, NearEntry<E>>,
    default_ttl: Duration,
}

impl<E> NearCache<E>
where
    E: CacheEntity,
{
    pub fn new(settings: &NearCacheSettings) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(settings.max_capacity)
            .expire_after(NearExpiry)
            .build();

        Self {
            cache,
            default_ttl: settings.ttl,
        }
    }

    /// Returns a live entry; expired entries are never returned
    pub async fn get(&self, key: &str) -> Option<E> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.remove(key).await;
                None
            }
            Some(entry) => Some(entry.entity.as_ref().clone()),
            None => None,
        }
    }

    pub async fn put(&self, key: &str, entity: E, ttl: Duration) {
        let entry = NearEntry {
            entity: Arc::new(entity),
            ttl,
            expires_at: Instant::now() + ttl,
        };

        self.cache.insert(key.to_string(), entry).await;
    }

    pub async fn put_default(&self, key: &str, entity: E) {
        self.put(key, entity, self.default_ttl).await;
    }

    pub async fn evict(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    pub async fn evict_many(&self, keys: &[String]) {
        join_all(keys.iter().map(|key| self.cache.invalidate(key.as_str()))).await;
    }

    /// Evicts every local key matching the glob, returns how many were evicted
    pub async fn evict_matching(&self, pattern: &GlobPattern) -> usize {
        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| pattern.is_match(key.as_str()))
            .map(|(key, _)| key.to_string())
            .collect();

        self.evict_many(&matching).await;
        matching.len()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, RecordId};

    fn record(id: &str) -> Record {
        Record::new(RecordId::new(id).unwrap(), serde_json::json!({ "id": id }))
    }

    fn near() -> NearCache<Record> {
        NearCache::new(&NearCacheSettings::default())
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = near();
        cache.put_default("users:a", record("a")).await;

        let hit = cache.get("users:a").await.unwrap();
        assert_eq!(hit.id.as_str(), "a");
        assert!(cache.get("users:b").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_returned() {
        let cache = near();
        cache
            .put("users:a", record("a"), Duration::from_millis(30))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get("users:a").await.is_none());
    }

    #[tokio::test]
    async fn test_evict_matching() {
        let cache = near();
        cache.put_default("ns:1", record("1")).await;
        cache.put_default("ns:2", record("2")).await;
        cache.put_default("other:1", record("1")).await;

        let evicted = cache
            .evict_matching(&GlobPattern::new("ns:*").unwrap())
            .await;

        assert_eq!(evicted, 2);
        assert!(cache.get("ns:1").await.is_none());
        assert!(cache.get("other:1").await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = near();
        cache.put_default("users:a", record("a")).await;
        cache.put_default("users:b", record("b")).await;

        cache.clear();

        assert!(cache.get("users:a").await.is_none());
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache: NearCache<Record> =
            NearCache::new(&NearCacheSettings::default().with_max_capacity(2));

        for i in 0..10 {
            cache.put_default(&format!("users:{}", i), record(&i.to_string())).await;
        }

        assert!(cache.entry_count().await <= 2);
    }
}
