//! Cache domain - keys, strategy and the distributed cache port

mod distributed;
mod entity;
mod key;
mod pattern;
mod strategy;

pub use distributed::{DistributedCache, ScanPage};
pub use entity::{CacheEntity, CacheId};
pub use key::{KeyCodec, KEY_SEPARATOR};
pub use pattern::GlobPattern;
pub use strategy::{
    CacheStrategy, CacheStrategyConfig, NearCacheSettings, StrategyFlags, WriteBehindSettings,
    WriteMode,
};

#[cfg(test)]
pub use distributed::mock;
