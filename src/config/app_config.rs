use std::time::Duration;

use serde::Deserialize;

use crate::domain::cache::{
    CacheStrategy, CacheStrategyConfig, NearCacheSettings, StrategyFlags, WriteBehindSettings,
};
use crate::domain::DomainError;
use crate::infrastructure::cache::DistributedCacheConfig;
use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::storage::{PostgresConfig, StoreConfig, StoreType};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub distributed: DistributedSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Repository construction parameters
///
/// `strategy` selects a preset; when absent the individual switches
/// (`read_through`, `write_through`, `write_behind`) are used instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub name: String,
    pub strategy: Option<String>,
    pub read_through: bool,
    pub write_through: bool,
    pub write_behind: bool,
    pub near_cache_enabled: bool,
    pub ttl_seconds: u64,
    pub near_cache_ttl_seconds: u64,
    pub near_cache_capacity: u64,
    pub negative_ttl_seconds: Option<u64>,
    pub delete_from_backing_store_on_invalidate: bool,
    pub write_behind_batch_size: usize,
    pub write_behind_flush_interval_ms: u64,
    pub write_behind_max_retries: u32,
    pub write_behind_shutdown_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub invalidation_batch_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: "records".to_string(),
            strategy: None,
            read_through: true,
            write_through: false,
            write_behind: false,
            near_cache_enabled: false,
            ttl_seconds: 3600,
            near_cache_ttl_seconds: 5,
            near_cache_capacity: 10_000,
            negative_ttl_seconds: None,
            delete_from_backing_store_on_invalidate: false,
            write_behind_batch_size: 200,
            write_behind_flush_interval_ms: 500,
            write_behind_max_retries: 3,
            write_behind_shutdown_timeout_ms: 5000,
            operation_timeout_ms: 2000,
            invalidation_batch_size: 100,
        }
    }
}

impl CacheSettings {
    fn write_behind_settings(&self) -> WriteBehindSettings {
        WriteBehindSettings::default()
            .with_batch_size(self.write_behind_batch_size)
            .with_flush_interval(Duration::from_millis(self.write_behind_flush_interval_ms))
            .with_max_retries(self.write_behind_max_retries)
            .with_shutdown_timeout(Duration::from_millis(self.write_behind_shutdown_timeout_ms))
    }

    fn near_cache_settings(&self) -> NearCacheSettings {
        NearCacheSettings::default()
            .with_ttl(Duration::from_secs(self.near_cache_ttl_seconds))
            .with_max_capacity(self.near_cache_capacity)
    }

    /// Builds and validates the repository strategy
    pub fn to_strategy_config(&self) -> Result<CacheStrategyConfig, DomainError> {
        let base = match &self.strategy {
            Some(name) => {
                let strategy: CacheStrategy = name.parse()?;
                let mut config = CacheStrategyConfig::preset(strategy);

                if strategy == CacheStrategy::WriteBehind {
                    config = CacheStrategyConfig::write_behind(self.write_behind_settings());
                }
                if self.near_cache_enabled {
                    config = config.with_near_cache(self.near_cache_settings());
                }
                config
            }
            None => {
                let flags = StrategyFlags {
                    read_through: self.read_through,
                    write_through: self.write_through,
                    write_behind: self.write_behind,
                    near_cache_enabled: self.near_cache_enabled,
                };
                CacheStrategyConfig::from_flags(
                    flags,
                    self.write_behind_settings(),
                    self.near_cache_settings(),
                )?
            }
        };

        let mut config = base
            .with_ttl(Duration::from_secs(self.ttl_seconds))
            .with_delete_on_invalidate(self.delete_from_backing_store_on_invalidate)
            .with_operation_timeout(Duration::from_millis(self.operation_timeout_ms))
            .with_invalidation_batch_size(self.invalidation_batch_size);

        if let Some(seconds) = self.negative_ttl_seconds {
            config = config.with_negative_ttl(Duration::from_secs(seconds));
        }

        config.validate()?;
        Ok(config)
    }
}

/// Distributed cache selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributedSettings {
    pub backend: String,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub max_capacity: u64,
    pub connection_timeout_ms: u64,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self {
            backend: "in_memory".to_string(),
            redis_url: None,
            key_prefix: None,
            max_capacity: 100_000,
            connection_timeout_ms: 5000,
        }
    }
}

impl DistributedSettings {
    pub fn to_factory_config(&self) -> Result<DistributedCacheConfig, DomainError> {
        Ok(DistributedCacheConfig {
            cache_type: self.backend.parse()?,
            redis_url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
            max_capacity: self.max_capacity,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
        })
    }
}

/// Backing store selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: String,
    pub database_url: Option<String>,
    pub table: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "in_memory".to_string(),
            database_url: None,
            table: "cache_records".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

impl StoreSettings {
    /// Falls back to `DATABASE_URL` when no URL is configured
    pub fn to_store_config(&self) -> Result<StoreConfig, DomainError> {
        match self.backend.parse::<StoreType>()? {
            StoreType::InMemory => Ok(StoreConfig::in_memory()),
            StoreType::Postgres => {
                let url = self
                    .database_url
                    .clone()
                    .or_else(|| std::env::var("DATABASE_URL").ok())
                    .ok_or_else(|| {
                        DomainError::configuration(
                            "store.database_url or DATABASE_URL is required for the postgres backend",
                        )
                    })?;

                let config = PostgresConfig::new(url)
                    .with_max_connections(self.max_connections)
                    .with_min_connections(self.min_connections)
                    .with_connect_timeout(self.connect_timeout_secs);

                Ok(StoreConfig::postgres(config, self.table.clone()))
            }
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
