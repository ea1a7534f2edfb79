//! Distributed cache port

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::DomainError;

/// One page of a cursor-based key scan
///
/// A returned `cursor` of `0` means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Shared key/value store reachable by every process
///
/// Values are opaque strings; callers own serialization. Single-key
/// operations are assumed atomic, multi-key ones are not transactional.
#[async_trait]
pub trait DistributedCache: Send + Sync + Debug {
    /// Gets a raw value from the cache
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Gets several raw values, positionally aligned with `keys`
    async fn get_many_raw(&self, keys: &[String]) -> Result<Vec<Option<String>>, DomainError> {
        let mut values = Vec::with_capacity(keys.len());

        for key in keys {
            values.push(self.get_raw(key).await?);
        }

        Ok(values)
    }

    /// Sets a raw value with a TTL
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError>;

    /// Sets several raw values sharing one TTL
    async fn set_many_raw(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), DomainError> {
        for (key, value) in entries {
            self.set_raw(key, value, ttl).await?;
        }

        Ok(())
    }

    /// Deletes a key, returns true if it was present
    async fn delete(&self, key: &str) -> Result<bool, DomainError>;

    /// Deletes several keys, returns how many were present
    async fn delete_many(&self, keys: &[String]) -> Result<usize, DomainError> {
        let mut deleted = 0;

        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Scans keys matching a glob, starting from `cursor` (0 to begin)
    async fn scan(&self, pattern: &str, cursor: u64, count: usize)
    -> Result<ScanPage, DomainError>;

    /// Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get_raw(key).await?.is_some())
    }
}
