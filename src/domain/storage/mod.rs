//! Storage domain - the durable backing store port

mod repository;

pub use repository::BackingStore;

#[cfg(test)]
pub use repository::mock;
