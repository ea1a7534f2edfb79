//! Domain layer - ports, entities and strategy configuration

pub mod cache;
pub mod error;
pub mod record;
pub mod storage;
pub mod traits;

pub use cache::{
    CacheEntity, CacheId, CacheStrategy, CacheStrategyConfig, DistributedCache, GlobPattern,
    KeyCodec, NearCacheSettings, ScanPage, StrategyFlags, WriteBehindSettings, WriteMode,
};
pub use error::DomainError;
pub use record::{Record, RecordId};
pub use storage::BackingStore;
pub use traits::EntityRepository;
