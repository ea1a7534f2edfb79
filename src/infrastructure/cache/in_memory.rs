//! In-memory distributed cache using moka
//!
//! Stands in for a remote cache when every repository instance lives in
//! the same process (tests, single-node deployments). Share one instance
//! through an `Arc` to get cross-repository visibility.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::Expiry;

use crate::domain::cache::{DistributedCache, GlobPattern, ScanPage};
use crate::domain::DomainError;

/// Configuration for the in-memory distributed cache
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
        }
    }
}

impl InMemoryCacheConfig {
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: String,
    ttl: Duration,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: &str, ttl: Duration) -> Self {
        Self {
            data: data.to_string(),
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Per-entry expiry so each key honours its own TTL
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Thread-safe in-memory implementation of [`DistributedCache`]
#[derive(Debug, Clone)]
pub struct InMemoryDistributedCache {
    cache: MokaCache<String, CacheEntry>,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { cache }
    }

    /// Approximate number of live entries
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.remove(key).await;
                None
            }
            other => other,
        }
    }
}

impl Default for InMemoryDistributedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        Ok(self.live_entry(key).await.map(|entry| entry.data))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        self.cache
            .insert(key.to_string(), CacheEntry::new(value, ttl))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        match self.cache.remove(key).await {
            Some(entry) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage, DomainError> {
        let glob = GlobPattern::new(pattern)?;

        self.cache.run_pending_tasks().await;

        let mut matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && glob.is_match(key.as_str()))
            .map(|(key, _)| key.to_string())
            .collect();
        matching.sort();

        let start = (cursor as usize).min(matching.len());
        let end = (start + count.max(1)).min(matching.len());
        let next = if end >= matching.len() { 0 } else { end as u64 };

        Ok(ScanPage {
            cursor: next,
            keys: matching[start..end].to_vec(),
        })
    }
}
