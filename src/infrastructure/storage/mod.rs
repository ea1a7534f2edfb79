//! Storage infrastructure - Backing store implementations

mod factory;
mod in_memory;
mod postgres;

pub use factory::{BackingStoreFactory, StoreConfig, StoreType};
pub use in_memory::InMemoryBackingStore;
pub use postgres::{PostgresBackingStore, PostgresConfig};
