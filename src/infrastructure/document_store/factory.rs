//! Document store factory for runtime backend selection

use std::sync::Arc;

use sqlx::postgres::PgPool;
use tracing::info;

use crate::domain::document_store::{BatchLimits, ContainerSpec, DocumentStore};
use crate::domain::DomainError;

use super::in_memory::{InMemoryDocumentStore, DEFAULT_PAGE_SIZE};
use super::postgres::{PostgresConfig, PostgresDocumentStore};

/// Supported storage backends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageType {
    /// Process-local containers
    #[default]
    InMemory,
    /// PostgreSQL with one JSONB table per container
    Postgres,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::InMemory => write!(f, "memory"),
            StorageType::Postgres => write!(f, "postgres"),
        }
    }
}

impl std::str::FromStr for StorageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(StorageType::InMemory),
            "postgres" | "postgresql" => Ok(StorageType::Postgres),
            _ => Err(DomainError::invalid_argument(format!(
                "Unknown storage backend: {}. Valid backends: memory, postgres",
                s
            ))),
        }
    }
}

/// Builds containers on the configured backend
///
/// Postgres containers share one connection pool, opened on construction.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    page_size: usize,
    limits: BatchLimits,
    pool: Option<PgPool>,
}

impl StoreFactory {
    /// Factory for in-memory containers
    pub fn in_memory() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            limits: BatchLimits::default(),
            pool: None,
        }
    }

    /// Factory for Postgres containers
    pub async fn postgres(config: &PostgresConfig) -> Result<Self, DomainError> {
        let pool = config.connect().await?;
        info!(max_connections = config.max_connections, "Connected to PostgreSQL");

        Ok(Self {
            page_size: DEFAULT_PAGE_SIZE,
            limits: BatchLimits::default(),
            pool: Some(pool),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn storage_type(&self) -> StorageType {
        if self.pool.is_some() {
            StorageType::Postgres
        } else {
            StorageType::InMemory
        }
    }

    /// Opens a container, creating its backing table when needed
    pub async fn create(
        &self,
        container: ContainerSpec,
    ) -> Result<Arc<dyn DocumentStore>, DomainError> {
        let name = container.name().to_string();

        let store: Arc<dyn DocumentStore> = match &self.pool {
            Some(pool) => {
                let store = PostgresDocumentStore::new(pool.clone(), container)
                    .with_page_size(self.page_size)
                    .with_limits(self.limits.clone());
                store.ensure_table().await?;
                Arc::new(store)
            }
            None => Arc::new(
                InMemoryDocumentStore::new(container)
                    .with_page_size(self.page_size)
                    .with_limits(self.limits.clone()),
            ),
        };

        info!(container = %name, backend = %self.storage_type(), "Container ready");
        Ok(store)
    }
}
