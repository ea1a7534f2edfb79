//! Backing store port

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::cache::CacheEntity;
use crate::domain::DomainError;

/// Durable source of truth behind the cache
///
/// The cache layer assumes nothing about batch atomicity: a call either
/// succeeds or fails as a whole from its point of view.
#[async_trait]
pub trait BackingStore<E>: Send + Sync + Debug
where
    E: CacheEntity,
{
    /// Loads an entity by id
    async fn load_one(&self, id: &E::Id) -> Result<Option<E>, DomainError>;

    /// Loads several entities; ids missing from the result were not found
    async fn load_many(&self, ids: &[E::Id]) -> Result<Vec<E>, DomainError>;

    /// Inserts or replaces every entity in the batch
    async fn upsert_batch(&self, entities: Vec<E>) -> Result<(), DomainError>;

    /// Deletes rows by id, returns how many existed
    async fn delete_many(&self, ids: &[E::Id]) -> Result<usize, DomainError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock backing store recording calls, with fault injection
    #[derive(Debug)]
    pub struct MockBackingStore<E>
    where
        E: CacheEntity,
    {
        rows: Mutex<HashMap<E::Id, E>>,
        upserts: Mutex<Vec<Vec<E>>>,
        failing: AtomicBool,
        failures_remaining: AtomicUsize,
        latency: Mutex<Option<Duration>>,
        load_one_calls: AtomicUsize,
        load_many_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    impl<E> Default for MockBackingStore<E>
    where
        E: CacheEntity,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<E> MockBackingStore<E>
    where
        E: CacheEntity,
    {
        pub fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                upserts: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
                failures_remaining: AtomicUsize::new(0),
                latency: Mutex::new(None),
                load_one_calls: AtomicUsize::new(0),
                load_many_calls: AtomicUsize::new(0),
                delete_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_entity(self, entity: E) -> Self {
            self.rows
                .lock()
                .unwrap()
                .insert(entity.id().clone(), entity);
            self
        }

        pub fn row(&self, id: &E::Id) -> Option<E> {
            self.rows.lock().unwrap().get(id).cloned()
        }

        pub fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        /// Every `upsert_batch` call, successful or not, in call order
        pub fn upsert_calls(&self) -> Vec<Vec<E>> {
            self.upserts.lock().unwrap().clone()
        }

        pub fn load_one_calls(&self) -> usize {
            self.load_one_calls.load(Ordering::SeqCst)
        }

        pub fn load_many_calls(&self) -> usize {
            self.load_many_calls.load(Ordering::SeqCst)
        }

        pub fn delete_calls(&self) -> usize {
            self.delete_calls.load(Ordering::SeqCst)
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Fails the next `count` calls, then recovers
        pub fn fail_next(&self, count: usize) {
            self.failures_remaining.store(count, Ordering::SeqCst);
        }

        pub fn set_latency(&self, latency: Option<Duration>) {
            *self.latency.lock().unwrap() = latency;
        }

        async fn simulate(&self) -> Result<(), DomainError> {
            let latency = *self.latency.lock().unwrap();

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if self.failing.load(Ordering::SeqCst) {
                return Err(DomainError::backing_store("Mock store failure"));
            }

            let consumed = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();

            if consumed {
                return Err(DomainError::backing_store("Mock transient store failure"));
            }

            Ok(())
        }
    }

    #[async_trait]
    impl<E> BackingStore<E> for MockBackingStore<E>
    where
        E: CacheEntity,
    {
        async fn load_one(&self, id: &E::Id) -> Result<Option<E>, DomainError> {
            self.load_one_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            Ok(self.row(id))
        }

        async fn load_many(&self, ids: &[E::Id]) -> Result<Vec<E>, DomainError> {
            self.load_many_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            let rows = self.rows.lock().unwrap();
            Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
        }

        async fn upsert_batch(&self, entities: Vec<E>) -> Result<(), DomainError> {
            self.upserts.lock().unwrap().push(entities.clone());
            self.simulate().await?;

            let mut rows = self.rows.lock().unwrap();
            for entity in entities {
                rows.insert(entity.id().clone(), entity);
            }

            Ok(())
        }

        async fn delete_many(&self, ids: &[E::Id]) -> Result<usize, DomainError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            let mut rows = self.rows.lock().unwrap();
            Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count())
        }
    }
}
