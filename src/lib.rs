//! Tiered Cache
//!
//! A cache-fronted repository for entities held in a slower backing store:
//! - Read-only, read-through, write-through and write-behind strategies
//! - Optional in-process near cache over a shared distributed cache
//! - Redis or in-memory distributed cache, PostgreSQL or in-memory backing store
//! - Batched write-behind flushing with retries and data loss reporting

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{DomainError, EntityRepository};
pub use infrastructure::repository::{CacheRepository, CacheRepositoryBuilder};
