//! Entity and identifier traits for cacheable values

use std::fmt::Debug;
use std::hash::Hash;

use serde::{de::DeserializeOwned, Serialize};

/// Trait for identifiers that can address a cached entity
///
/// `key_segment` must be injective: two different ids never produce the
/// same segment.
pub trait CacheId: Clone + Debug + Send + Sync + Eq + Hash + 'static {
    /// Returns the id rendered as the trailing segment of a cache key
    fn key_segment(&self) -> String;
}

impl CacheId for String {
    fn key_segment(&self) -> String {
        self.clone()
    }
}

impl CacheId for i64 {
    fn key_segment(&self) -> String {
        self.to_string()
    }
}

impl CacheId for u64 {
    fn key_segment(&self) -> String {
        self.to_string()
    }
}

impl CacheId for i32 {
    fn key_segment(&self) -> String {
        self.to_string()
    }
}

impl CacheId for uuid::Uuid {
    fn key_segment(&self) -> String {
        self.hyphenated().to_string()
    }
}

/// Trait for values the repository can cache and persist
pub trait CacheEntity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// The identifier type for this entity
    type Id: CacheId;

    /// Returns the entity's identifier
    fn id(&self) -> &Self::Id;
}
