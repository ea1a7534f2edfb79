use async_trait::async_trait;
use std::fmt::Debug;

use crate::domain::cache::CacheEntity;
use crate::domain::DomainError;

/// Repository port exposed to application code
///
/// Implementations decide how reads and writes fan out across cache tiers
/// and the backing store.
#[async_trait]
pub trait EntityRepository<E>: Send + Sync + Debug
where
    E: CacheEntity,
{
    async fn get(&self, id: &E::Id) -> Result<Option<E>, DomainError>;

    /// Returns one entity per distinct id found in some tier; unknown ids are omitted
    async fn get_all(&self, ids: &[E::Id]) -> Result<Vec<E>, DomainError>;

    async fn put(&self, entity: E) -> Result<(), DomainError>;

    async fn put_all(&self, entities: Vec<E>) -> Result<(), DomainError>;

    /// Returns how many of the keys were present in the distributed tier
    async fn invalidate(&self, ids: &[E::Id]) -> Result<usize, DomainError>;

    /// Clears the cache namespace; never touches the backing store
    async fn invalidate_all(&self) -> Result<usize, DomainError>;

    async fn invalidate_by_pattern(&self, glob: &str) -> Result<usize, DomainError>;
}
