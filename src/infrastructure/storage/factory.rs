//! Backing store factory for runtime store selection

use std::sync::Arc;

use crate::domain::cache::CacheEntity;
use crate::domain::storage::BackingStore;
use crate::domain::DomainError;

use super::in_memory::InMemoryBackingStore;
use super::postgres::{PostgresBackingStore, PostgresConfig};

/// Supported backing store types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreType {
    /// In-memory store (for testing/development)
    InMemory,
    /// PostgreSQL store
    Postgres,
}

impl std::str::FromStr for StoreType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Ok(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => Err(DomainError::configuration(format!(
                "Unknown store type: {}. Valid types: in_memory, postgres",
                s
            ))),
        }
    }
}

/// Backing store configuration
#[derive(Debug, Clone)]
pub enum StoreConfig {
    InMemory,
    Postgres {
        config: PostgresConfig,
        table_name: String,
    },
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::InMemory
    }

    pub fn postgres(config: PostgresConfig, table_name: impl Into<String>) -> Self {
        Self::Postgres {
            config,
            table_name: table_name.into(),
        }
    }

    pub fn store_type(&self) -> StoreType {
        match self {
            Self::InMemory => StoreType::InMemory,
            Self::Postgres { .. } => StoreType::Postgres,
        }
    }
}

/// Factory for creating backing store instances
#[derive(Debug)]
pub struct BackingStoreFactory;

impl BackingStoreFactory {
    /// Creates a backing store based on the configuration
    ///
    /// Postgres stores get their table created if missing.
    pub async fn create<E>(config: &StoreConfig) -> Result<Arc<dyn BackingStore<E>>, DomainError>
    where
        E: CacheEntity,
    {
        match config {
            StoreConfig::InMemory => Ok(Arc::new(InMemoryBackingStore::<E>::new())),
            StoreConfig::Postgres { config, table_name } => {
                let store = PostgresBackingStore::<E>::connect(config, table_name.clone()).await?;
                store.ensure_table().await?;
                tracing::info!(table = %table_name, "Connected PostgreSQL backing store");
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, RecordId};

    #[test]
    fn test_store_type_from_str() {
        assert_eq!("memory".parse::<StoreType>().unwrap(), StoreType::InMemory);
        assert_eq!("in_memory".parse::<StoreType>().unwrap(), StoreType::InMemory);
        assert_eq!("postgres".parse::<StoreType>().unwrap(), StoreType::Postgres);
        assert_eq!("PG".parse::<StoreType>().unwrap(), StoreType::Postgres);
        assert!("mysql".parse::<StoreType>().is_err());
    }

    #[test]
    fn test_store_config_type() {
        assert_eq!(StoreConfig::in_memory().store_type(), StoreType::InMemory);
        assert_eq!(
            StoreConfig::postgres(PostgresConfig::default(), "records").store_type(),
            StoreType::Postgres
        );
    }

    #[tokio::test]
    async fn test_create_in_memory() {
        let store = BackingStoreFactory::create::<Record>(&StoreConfig::in_memory())
            .await
            .unwrap();

        let record = Record::new(RecordId::new("a").unwrap(), serde_json::json!({}));
        store.upsert_batch(vec![record.clone()]).await.unwrap();

        assert_eq!(store.load_one(&record.id).await.unwrap(), Some(record));
    }
}
