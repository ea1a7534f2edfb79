//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, CacheSettings, DistributedSettings, LogFormat, LoggingConfig, StoreSettings,
};
