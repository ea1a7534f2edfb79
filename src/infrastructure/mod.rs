//! Infrastructure layer - cache, storage and repository implementations

pub mod cache;
pub mod logging;
pub mod observability;
pub mod repository;
pub mod storage;
