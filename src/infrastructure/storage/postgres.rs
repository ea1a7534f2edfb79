//! PostgreSQL backing store with connection pooling

use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::domain::cache::{CacheEntity, CacheId};
use crate::domain::storage::BackingStore;
use crate::domain::DomainError;

/// PostgreSQL backing store configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/tiered_cache".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }
}

/// PostgreSQL backing store
///
/// Stores entities as JSONB in a `(key, data)` table keyed by the entity
/// id's key segment. Batch upserts are a single `INSERT .. ON CONFLICT`
/// statement over `UNNEST`ed arrays, so each batch is atomic.
pub struct PostgresBackingStore<E>
where
    E: CacheEntity,
{
    pool: PgPool,
    table_name: String,
    _phantom: PhantomData<E>,
}

impl<E> Debug for PostgresBackingStore<E>
where
    E: CacheEntity,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackingStore")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl<E> PostgresBackingStore<E>
where
    E: CacheEntity,
{
    /// Creates a backing store over an existing pool
    pub fn new(pool: PgPool, table_name: impl Into<String>) -> Result<Self, DomainError> {
        let table_name = table_name.into();
        validate_table_name(&table_name)?;

        Ok(Self {
            pool,
            table_name,
            _phantom: PhantomData,
        })
    }

    /// Creates a backing store with its own connection pool
    pub async fn connect(
        config: &PostgresConfig,
        table_name: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| {
                DomainError::backing_store(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        Self::new(pool, table_name)
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensures the backing table exists
    pub async fn ensure_table(&self) -> Result<(), DomainError> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key VARCHAR(255) PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.table_name
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::backing_store(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    fn decode(data: serde_json::Value) -> Result<E, DomainError> {
        serde_json::from_value(data)
            .map_err(|e| DomainError::serialization(format!("Failed to deserialize entity: {}", e)))
    }
}

fn validate_table_name(name: &str) -> Result<(), DomainError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(DomainError::configuration(format!(
            "Invalid table name '{}'",
            name
        )))
    }
}

/// Keeps the last entity per key, in first-seen key order
fn coalesce<E: CacheEntity>(entities: Vec<E>) -> Result<(Vec<String>, Vec<serde_json::Value>), DomainError> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(entities.len());
    let mut keys = Vec::with_capacity(entities.len());
    let mut payloads = Vec::with_capacity(entities.len());

    for entity in entities {
        let key = entity.id().key_segment();
        let data = serde_json::to_value(&entity).map_err(|e| {
            DomainError::serialization(format!("Failed to serialize entity: {}", e))
        })?;

        match positions.get(&key) {
            Some(&index) => payloads[index] = data,
            None => {
                positions.insert(key.clone(), keys.len());
                keys.push(key);
                payloads.push(data);
            }
        }
    }

    Ok((keys, payloads))
}

#[async_trait]
impl<E> BackingStore<E> for PostgresBackingStore<E>
where
    E: CacheEntity,
{
    async fn load_one(&self, id: &E::Id) -> Result<Option<E>, DomainError> {
        let query = format!("SELECT data FROM {} WHERE key = $1", self.table_name);

        let result = sqlx::query(&query)
            .bind(id.key_segment())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::backing_store(format!("Failed to load entity: {}", e)))?;

        match result {
            Some(row) => Ok(Some(Self::decode(row.get("data"))?)),
            None => Ok(None),
        }
    }

    async fn load_many(&self, ids: &[E::Id]) -> Result<Vec<E>, DomainError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| id.key_segment()).collect();
        let query = format!("SELECT data FROM {} WHERE key = ANY($1)", self.table_name);

        let rows = sqlx::query(&query)
            .bind(&keys)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::backing_store(format!("Failed to load entities: {}", e)))?;

        rows.into_iter()
            .map(|row| Self::decode(row.get("data")))
            .collect()
    }

    async fn upsert_batch(&self, entities: Vec<E>) -> Result<(), DomainError> {
        if entities.is_empty() {
            return Ok(());
        }

        let (keys, payloads) = coalesce(entities)?;
        let query = format!(
            r#"
            INSERT INTO {} (key, data)
            SELECT * FROM UNNEST($1::varchar[], $2::jsonb[])
            ON CONFLICT (key) DO UPDATE
            SET data = EXCLUDED.data, updated_at = NOW()
            "#,
            self.table_name
        );

        sqlx::query(&query)
            .bind(&keys)
            .bind(&payloads)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::backing_store(format!("Failed to upsert batch: {}", e)))?;

        tracing::debug!(table = %self.table_name, rows = keys.len(), "Upserted batch");
        Ok(())
    }

    async fn delete_many(&self, ids: &[E::Id]) -> Result<usize, DomainError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = ids.iter().map(|id| id.key_segment()).collect();
        let query = format!("DELETE FROM {} WHERE key = ANY($1)", self.table_name);

        let result = sqlx::query(&query)
            .bind(&keys)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::backing_store(format!("Failed to delete entities: {}", e)))?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, RecordId};

    fn record(id: &str, n: i64) -> Record {
        Record::new(RecordId::new(id).unwrap(), serde_json::json!({ "n": n }))
    }

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 600);
    }

    #[test]
    fn test_postgres_config_builder() {
        let config = PostgresConfig::new("postgres://localhost/test")
            .with_max_connections(20)
            .with_min_connections(5)
            .with_connect_timeout(60)
            .with_idle_timeout(300);

        assert_eq!(config.url, "postgres://localhost/test");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.connect_timeout_secs, 60);
        assert_eq!(config.idle_timeout_secs, 300);
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("records").is_ok());
        assert!(validate_table_name("cache.records_v2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("records; DROP TABLE x").is_err());
        assert!(validate_table_name("1records").is_err());
    }

    #[test]
    fn test_coalesce_keeps_last_write_per_key() {
        let (keys, payloads) =
            coalesce(vec![record("a", 1), record("b", 2), record("a", 3)]).unwrap();

        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(payloads[0]["data"]["n"], 3);
        assert_eq!(payloads[1]["data"]["n"], 2);
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_postgres_upsert_and_load() {
        let store = PostgresBackingStore::<Record>::connect(
            &PostgresConfig::new("postgres://localhost/tiered_cache_test"),
            "records_test",
        )
        .await
        .unwrap();
        store.ensure_table().await.unwrap();

        store
            .upsert_batch(vec![record("pg-1", 1), record("pg-2", 2)])
            .await
            .unwrap();

        let one = store.load_one(&RecordId::new("pg-1").unwrap()).await.unwrap();
        assert_eq!(one.unwrap().data["n"], 1);

        let ids = vec![RecordId::new("pg-1").unwrap(), RecordId::new("pg-2").unwrap()];
        assert_eq!(store.load_many(&ids).await.unwrap().len(), 2);
        assert_eq!(store.delete_many(&ids).await.unwrap(), 2);
    }
}
