//! Redis distributed cache implementation

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::domain::cache::{DistributedCache, ScanPage};
use crate::domain::DomainError;

/// Configuration for Redis cache
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Key prefix for sharing one database between applications
    pub key_prefix: Option<String>,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisCacheConfig {
    /// Creates a new configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis implementation of [`DistributedCache`]
///
/// Uses GET/MGET, PSETEX (pipelined for multi-set), DEL and
/// `SCAN MATCH COUNT`. Nothing beyond these commands is required, so any
/// Redis-compatible server works.
#[derive(Clone)]
pub struct RedisDistributedCache {
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl fmt::Debug for RedisDistributedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDistributedCache")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisDistributedCache {
    /// Creates a new Redis cache connection
    pub async fn new(config: RedisCacheConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            DomainError::distributed_cache(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            DomainError::distributed_cache(format!(
                "Timed out connecting to Redis after {:?}",
                config.connection_timeout
            ))
        })?
        .map_err(|e| DomainError::distributed_cache(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { connection, config })
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn strip_prefix(&self, key: String) -> String {
        match &self.config.key_prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .map(str::to_string)
                .unwrap_or(key),
            None => key,
        }
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }
}

#[async_trait]
impl DistributedCache for RedisDistributedCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let prefixed_key = self.prefix_key(key);
        let mut conn = self.connection.clone();

        let result: Option<String> = conn.get(&prefixed_key).await.map_err(|e| {
            DomainError::distributed_cache(format!("Failed to get key '{}': {}", key, e))
        })?;

        Ok(result)
    }

    async fn get_many_raw(&self, keys: &[String]) -> Result<Vec<Option<String>>, DomainError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let prefixed: Vec<String> = keys.iter().map(|key| self.prefix_key(key)).collect();
        let mut conn = self.connection.clone();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&prefixed)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                DomainError::distributed_cache(format!(
                    "Failed to get {} keys: {}",
                    keys.len(),
                    e
                ))
            })?;

        Ok(values)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        let prefixed_key = self.prefix_key(key);
        let mut conn = self.connection.clone();

        let _: () = conn
            .pset_ex(&prefixed_key, value, Self::ttl_millis(ttl))
            .await
            .map_err(|e| {
                DomainError::distributed_cache(format!("Failed to set key '{}': {}", key, e))
            })?;

        Ok(())
    }

    async fn set_many_raw(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), DomainError> {
        if entries.is_empty() {
            return Ok(());
        }

        let millis = Self::ttl_millis(ttl);
        let mut pipe = redis::pipe();

        for (key, value) in entries {
            pipe.cmd("PSETEX")
                .arg(self.prefix_key(key))
                .arg(millis)
                .arg(value)
                .ignore();
        }

        let mut conn = self.connection.clone();
        pipe.query_async::<()>(&mut conn).await.map_err(|e| {
            DomainError::distributed_cache(format!(
                "Failed to set {} keys: {}",
                entries.len(),
                e
            ))
        })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let prefixed_key = self.prefix_key(key);
        let mut conn = self.connection.clone();

        let deleted: i64 = conn.del(&prefixed_key).await.map_err(|e| {
            DomainError::distributed_cache(format!("Failed to delete key '{}': {}", key, e))
        })?;

        Ok(deleted > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, DomainError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let prefixed: Vec<String> = keys.iter().map(|key| self.prefix_key(key)).collect();
        let mut conn = self.connection.clone();

        let deleted: i64 = conn.del(&prefixed).await.map_err(|e| {
            DomainError::distributed_cache(format!("Failed to delete keys: {}", e))
        })?;

        Ok(deleted.max(0) as usize)
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage, DomainError> {
        let prefixed_pattern = self.prefix_key(pattern);
        let mut conn = self.connection.clone();

        // SCAN rather than KEYS so large keyspaces never block the server
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&prefixed_pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                DomainError::distributed_cache(format!(
                    "Failed to scan keys with pattern '{}': {}",
                    pattern, e
                ))
            })?;

        Ok(ScanPage {
            cursor: next,
            keys: keys.into_iter().map(|key| self.strip_prefix(key)).collect(),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        let prefixed_key = self.prefix_key(key);
        let mut conn = self.connection.clone();

        let exists: bool = conn.exists(&prefixed_key).await.map_err(|e| {
            DomainError::distributed_cache(format!(
                "Failed to check existence of key '{}': {}",
                key, e
            ))
        })?;

        Ok(exists)
    }
}
