//! Semantic Chat Store
//!
//! Persistence and retrieval layer for a chat application:
//! - Chat sessions and messages with partition-scoped transactional batches
//! - A semantic completion cache keyed by embedding similarity
//! - Vector similarity search over a product catalog
//!
//! Every service sits on the [`domain::document_store::DocumentStore`]
//! contract, backed in memory or by PostgreSQL.

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use domain::catalog::Product;
use domain::document_store::ContainerSpec;
use infrastructure::document_store::{PostgresConfig, StorageType, StoreFactory};
use infrastructure::services::{ChatSessionService, ProductSearchService, SemanticCacheService};

/// Partition key path of the chat container
pub const CHAT_PARTITION_KEY_PATH: &str = "/sessionId";
/// Partition key path of the cache container
pub const CACHE_PARTITION_KEY_PATH: &str = "/id";
/// Partition key path of the product container
pub const PRODUCT_PARTITION_KEY_PATH: &str = "/categoryId";

/// The services exposed to callers
#[derive(Debug, Clone)]
pub struct ChatDataStores {
    pub chat: Arc<ChatSessionService>,
    pub cache: Arc<SemanticCacheService>,
    pub products: Arc<ProductSearchService>,
    /// Retrieval threshold for cache lookups without their own
    pub cache_threshold: f32,
}

/// Build every service from configuration.
///
/// Opens the connection pool and creates missing tables for the postgres
/// backend; seeding is a separate step, see [`ensure_catalog_seeded`].
pub async fn create_stores(config: &AppConfig) -> anyhow::Result<ChatDataStores> {
    config.validate().context("Invalid configuration")?;

    let storage_type = config.storage.storage_type()?;
    info!(backend = %storage_type, "Creating document stores");

    let factory = match storage_type {
        StorageType::InMemory => StoreFactory::in_memory(),
        StorageType::Postgres => {
            let url = config
                .storage
                .postgres_url
                .clone()
                .context("storage.postgres_url is required for the postgres backend")?;
            let pg = PostgresConfig::new(url).with_max_connections(config.storage.max_connections);

            StoreFactory::postgres(&pg).await?
        }
    }
    .with_page_size(config.storage.page_size)
    .with_limits(config.storage.batch_limits());

    let chat = factory
        .create(ContainerSpec::new(&config.containers.chat, CHAT_PARTITION_KEY_PATH)?)
        .await?;
    let cache = factory
        .create(ContainerSpec::new(&config.containers.cache, CACHE_PARTITION_KEY_PATH)?)
        .await?;
    let products = factory
        .create(ContainerSpec::new(
            &config.containers.products,
            PRODUCT_PARTITION_KEY_PATH,
        )?)
        .await?;

    let mut cache_service = SemanticCacheService::new(cache);
    if let Some(dimensions) = config.cache.dimensions {
        cache_service = cache_service.with_dimensions(dimensions);
    }

    let product_service = ProductSearchService::new(products)
        .with_container_name(&config.containers.products)
        .with_defaults(config.search.min_score, config.search.max_results);

    Ok(ChatDataStores {
        chat: Arc::new(ChatSessionService::new(chat)),
        cache: Arc::new(cache_service),
        products: Arc::new(product_service),
        cache_threshold: config.cache.similarity_threshold,
    })
}

/// Seed the product catalog if it is empty. Run once before serving.
pub async fn ensure_catalog_seeded(
    stores: &ChatDataStores,
    catalog: Vec<Product>,
) -> anyhow::Result<usize> {
    let seeded = stores
        .products
        .ensure_seeded(catalog)
        .await
        .context("Failed to seed product catalog")?;

    Ok(seeded)
}
