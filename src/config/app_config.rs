use serde::{Deserialize, Serialize};

use crate::domain::document_store::BatchLimits;
use crate::domain::DomainError;
use crate::infrastructure::document_store::{StorageType, DEFAULT_PAGE_SIZE};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub containers: ContainersConfig,
    pub cache: CacheConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` or `postgres`
    pub backend: String,
    pub postgres_url: Option<String>,
    pub max_connections: u32,
    pub page_size: usize,
    pub max_batch_operations: usize,
    pub max_item_bytes: usize,
}

/// Container names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainersConfig {
    pub chat: String,
    pub cache: String,
    pub products: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default retrieval threshold for callers without their own
    pub similarity_threshold: f32,
    /// Fixed embedding dimensionality. When unset, the cache pins the
    /// dimensionality of its first stored vector until it is cleared.
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_score: f32,
    pub max_results: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let limits = BatchLimits::default();

        Self {
            backend: StorageType::InMemory.to_string(),
            postgres_url: None,
            max_connections: 10,
            page_size: DEFAULT_PAGE_SIZE,
            max_batch_operations: limits.max_operations,
            max_item_bytes: limits.max_item_bytes,
        }
    }
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            chat: "chat".to_string(),
            cache: "cache".to_string(),
            products: "products".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            dimensions: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: 0.30,
            max_results: 10,
        }
    }
}

impl StorageConfig {
    pub fn storage_type(&self) -> Result<StorageType, DomainError> {
        self.backend.parse()
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_operations: self.max_batch_operations,
            max_item_bytes: self.max_item_bytes,
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

    /// Reject settings no store can be built from
    pub fn validate(&self) -> Result<(), DomainError> {
        let storage_type = self.storage.storage_type()?;

        if storage_type == StorageType::Postgres
            && self
                .storage
                .postgres_url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            return Err(DomainError::invalid_argument(
                "storage.postgres_url is required for the postgres backend",
            ));
        }

        if self.storage.page_size == 0 {
            return Err(DomainError::invalid_argument(
                "storage.page_size must be greater than zero",
            ));
        }

        if self.storage.max_batch_operations == 0 {
            return Err(DomainError::invalid_argument(
                "storage.max_batch_operations must be greater than zero",
            ));
        }

        if self.storage.max_item_bytes == 0 {
            return Err(DomainError::invalid_argument(
                "storage.max_item_bytes must be greater than zero",
            ));
        }

        for (key, name) in [
            ("chat", &self.containers.chat),
            ("cache", &self.containers.cache),
            ("products", &self.containers.products),
        ] {
            if name.trim().is_empty() {
                return Err(DomainError::invalid_argument(format!(
                    "containers.{} must not be empty",
                    key
                )));
            }
        }

        if self.cache.dimensions == Some(0) {
            return Err(DomainError::invalid_argument(
                "cache.dimensions must be greater than zero when set",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.storage.storage_type().unwrap(), StorageType::InMemory);
        assert_eq!(config.storage.batch_limits(), BatchLimits::default());
        assert_eq!(config.containers.chat, "chat");
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = AppConfig::default();
        config.storage.backend = "postgres".to_string();

        assert!(config.validate().unwrap_err().is_invalid_argument());

        config.storage.postgres_url = Some("postgres://localhost/chat".to_string());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_rejects_zero_limits_and_empty_names() {
        let mut config = AppConfig::default();
        config.storage.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.max_batch_operations = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.containers.cache = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.storage.backend = "cosmos".to_string();

        assert_err!(config.validate());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "logging": {"format": "json"},
            "search": {"max_results": 3}
        }))
        .unwrap();

        assert!(matches!(config.logging.format, LogFormat::Json));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.search.max_results, 3);
        assert_eq!(config.search.min_score, 0.30);
    }
}
