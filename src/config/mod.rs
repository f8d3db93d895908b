//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, CacheConfig, ContainersConfig, LogFormat, LoggingConfig, SearchConfig,
    StorageConfig,
};
