//! Distributed cache selection from configuration

use std::sync::Arc;
use std::time::Duration;

use crate::domain::cache::DistributedCache;
use crate::domain::DomainError;

use super::in_memory::{InMemoryCacheConfig, InMemoryDistributedCache};
use super::redis::{RedisCacheConfig, RedisDistributedCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    #[default]
    InMemory,
    Redis,
}

impl std::str::FromStr for CacheType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(CacheType::InMemory),
            "redis" => Ok(CacheType::Redis),
            other => Err(DomainError::configuration(format!(
                "Unknown distributed cache backend '{}', expected in_memory or redis",
                other
            ))),
        }
    }
}

/// Backend choice plus the knobs each backend reads
///
/// `max_capacity` only applies in memory; `key_prefix` and
/// `connection_timeout` only apply to Redis.
#[derive(Debug, Clone)]
pub struct DistributedCacheConfig {
    pub cache_type: CacheType,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub max_capacity: u64,
    pub connection_timeout: Duration,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::InMemory,
            redis_url: None,
            key_prefix: None,
            max_capacity: 100_000,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct DistributedCacheFactory;

impl DistributedCacheFactory {
    /// Builds the configured cache; Redis connects eagerly
    pub async fn create(
        config: &DistributedCacheConfig,
    ) -> Result<Arc<dyn DistributedCache>, DomainError> {
        match config.cache_type {
            CacheType::InMemory => {
                let cache = InMemoryDistributedCache::with_config(
                    InMemoryCacheConfig::default().with_max_capacity(config.max_capacity),
                );
                tracing::info!(max_capacity = config.max_capacity, "Using in-memory distributed cache");
                Ok(Arc::new(cache))
            }
            CacheType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("distributed.redis_url is required for the redis backend")
                })?;

                let mut redis_config =
                    RedisCacheConfig::new(url).with_connection_timeout(config.connection_timeout);
                if let Some(prefix) = &config.key_prefix {
                    redis_config = redis_config.with_key_prefix(prefix.clone());
                }

                let cache = RedisDistributedCache::new(redis_config).await?;
                tracing::info!(prefix = ?config.key_prefix, "Connected Redis distributed cache");
                Ok(Arc::new(cache))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!("in-memory".parse::<CacheType>().unwrap(), CacheType::InMemory);
        assert_eq!("REDIS".parse::<CacheType>().unwrap(), CacheType::Redis);
        assert!("memcached".parse::<CacheType>().is_err());
    }

    #[tokio::test]
    async fn test_in_memory_backend_is_usable() {
        let config = DistributedCacheConfig {
            max_capacity: 10,
            ..Default::default()
        };
        let cache = DistributedCacheFactory::create(&config).await.unwrap();

        cache
            .set_raw("users:1", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get_raw("users:1").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_redis_without_url_is_rejected() {
        let config = DistributedCacheConfig {
            cache_type: CacheType::Redis,
            ..Default::default()
        };

        let err = DistributedCacheFactory::create(&config).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidConfiguration { .. }));
    }
}
