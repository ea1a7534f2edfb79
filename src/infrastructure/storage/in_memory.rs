//! In-memory backing store implementation

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::cache::CacheEntity;
use crate::domain::storage::BackingStore;
use crate::domain::DomainError;

/// Thread-safe in-memory backing store
///
/// Useful for testing and development. Data is lost when the process terminates.
#[derive(Debug)]
pub struct InMemoryBackingStore<E>
where
    E: CacheEntity,
{
    entities: RwLock<HashMap<E::Id, E>>,
}

impl<E> Default for InMemoryBackingStore<E>
where
    E: CacheEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryBackingStore<E>
where
    E: CacheEntity,
{
    /// Creates a new empty store
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store pre-populated with entities
    pub fn with_entities(entities: Vec<E>) -> Self {
        let map = entities
            .into_iter()
            .map(|entity| (entity.id().clone(), entity))
            .collect();

        Self {
            entities: RwLock::new(map),
        }
    }

    /// Returns the number of stored entities
    pub fn len(&self) -> Result<usize, DomainError> {
        let entities = self.entities.read().map_err(|e| {
            DomainError::backing_store(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(entities.len())
    }

    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl<E> BackingStore<E> for InMemoryBackingStore<E>
where
    E: CacheEntity,
{
    async fn load_one(&self, id: &E::Id) -> Result<Option<E>, DomainError> {
        let entities = self.entities.read().map_err(|e| {
            DomainError::backing_store(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(entities.get(id).cloned())
    }

    async fn load_many(&self, ids: &[E::Id]) -> Result<Vec<E>, DomainError> {
        let entities = self.entities.read().map_err(|e| {
            DomainError::backing_store(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(ids.iter().filter_map(|id| entities.get(id).cloned()).collect())
    }

    async fn upsert_batch(&self, batch: Vec<E>) -> Result<(), DomainError> {
        let mut entities = self.entities.write().map_err(|e| {
            DomainError::backing_store(format!("Failed to acquire write lock: {}", e))
        })?;

        for entity in batch {
            entities.insert(entity.id().clone(), entity);
        }

        Ok(())
    }

    async fn delete_many(&self, ids: &[E::Id]) -> Result<usize, DomainError> {
        let mut entities = self.entities.write().map_err(|e| {
            DomainError::backing_store(format!("Failed to acquire write lock: {}", e))
        })?;

        Ok(ids.iter().filter(|id| entities.remove(*id).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, RecordId};

    fn record(id: &str) -> Record {
        Record::new(RecordId::new(id).unwrap(), serde_json::json!({ "name": id }))
    }

    fn id(value: &str) -> RecordId {
        RecordId::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_load_one() {
        let store = InMemoryBackingStore::new();
        store.upsert_batch(vec![record("a")]).await.unwrap();

        let loaded = store.load_one(&id("a")).await.unwrap();
        assert_eq!(loaded.unwrap().data["name"], "a");
        assert!(store.load_one(&id("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let store = InMemoryBackingStore::with_entities(vec![record("a")]);

        let mut updated = record("a");
        updated.data = serde_json::json!({ "name": "renamed" });
        store.upsert_batch(vec![updated]).await.unwrap();

        let loaded = store.load_one(&id("a")).await.unwrap().unwrap();
        assert_eq!(loaded.data["name"], "renamed");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_load_many_omits_missing() {
        let store = InMemoryBackingStore::with_entities(vec![record("a"), record("b")]);

        let loaded = store
            .load_many(&[id("a"), id("missing"), id("b")])
            .await
            .unwrap();

        let ids: Vec<&str> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_many_counts_existing() {
        let store = InMemoryBackingStore::with_entities(vec![record("a"), record("b")]);

        let deleted = store.delete_many(&[id("a"), id("missing")]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len().unwrap(), 1);
        assert!(!store.is_empty().unwrap());
    }
}
