//! Repository infrastructure - the tiered cache façade and write-behind machinery

mod cache_repository;
mod error_sink;
mod write_behind;

pub use cache_repository::{CacheRepository, CacheRepositoryBuilder};
pub use error_sink::{DroppedWrites, TracingErrorSink, WriteBehindErrorSink};
pub use write_behind::WriteBehindQueue;
