//! Cache infrastructure - distributed cache adapters and the near cache

mod factory;
mod in_memory;
mod near;
mod redis;

pub use factory::{CacheType, DistributedCacheConfig, DistributedCacheFactory};
pub use in_memory::{InMemoryCacheConfig, InMemoryDistributedCache};
pub use near::NearCache;
pub use redis::{RedisCacheConfig, RedisDistributedCache};
