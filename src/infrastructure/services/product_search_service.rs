//! Vector search over the product catalog

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::domain::catalog::{Product, ProductSearchResult, PRODUCT_SEARCH_FIELDS};
use crate::domain::document_store::{
    DocumentStore, DocumentStoreExt, PartitionKey, Query, QueryPager,
};
use crate::domain::DomainError;
use crate::infrastructure::metrics;

/// Default similarity floor for product search
pub const DEFAULT_MIN_SCORE: f32 = 0.30;

/// Default number of products returned by a search
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Product catalog search service
#[derive(Debug)]
pub struct ProductSearchService {
    store: Arc<dyn DocumentStore>,
    container: String,
    min_score: f32,
    max_results: usize,
    seeded: AtomicBool,
}

impl ProductSearchService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            container: "products".to_string(),
            min_score: DEFAULT_MIN_SCORE,
            max_results: DEFAULT_MAX_RESULTS,
            seeded: AtomicBool::new(false),
        }
    }

    /// Container name used for metric labels
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container = name.into();
        self
    }

    /// Defaults used by [`Self::search_with_defaults`]
    pub fn with_defaults(mut self, min_score: f32, max_results: usize) -> Self {
        self.min_score = min_score;
        self.max_results = max_results;
        self
    }

    /// Products scoring above `min_score`, best first, at most `max_results`.
    ///
    /// No match is an empty result, not an error.
    pub async fn search(
        &self,
        vector: &[f32],
        min_score: f32,
        max_results: usize,
    ) -> Result<Vec<ProductSearchResult>, DomainError> {
        let started = Instant::now();
        let query = Query::new()
            .with_vector_rank("vector", vector.to_vec())
            .with_min_score(min_score)
            .with_limit(max_results)
            .with_fields(&PRODUCT_SEARCH_FIELDS);

        let rows = QueryPager::new(self.store.as_ref(), query)
            .collect_all()
            .await?;

        let mut results = Vec::with_capacity(rows.len());

        for row in rows {
            let score = row.score.unwrap_or_default();
            let mut result: ProductSearchResult = row.into_typed()?;
            result.similarity_score = score;
            results.push(result);
        }

        metrics::record_vector_search(&self.container, results.len(), started.elapsed());
        debug!(
            results = results.len(),
            min_score,
            max_results,
            "Product search completed"
        );

        Ok(results)
    }

    /// Search with the configured floor and result count
    pub async fn search_with_defaults(
        &self,
        vector: &[f32],
    ) -> Result<Vec<ProductSearchResult>, DomainError> {
        self.search(vector, self.min_score, self.max_results).await
    }

    pub async fn upsert_product(&self, product: &Product) -> Result<(), DomainError> {
        self.store.upsert(product).await
    }

    /// Delete by id within its category, returns true if it existed
    pub async fn delete_product(&self, id: &str, category_id: &str) -> Result<bool, DomainError> {
        self.store
            .delete_item(&PartitionKey::new(category_id), id)
            .await
    }

    async fn is_empty(&self) -> Result<bool, DomainError> {
        let probe = Query::new().with_value("id").with_limit(1);
        let page = self.store.query_page(&probe, None).await?;

        Ok(page.rows.is_empty())
    }

    /// Import `products` if the catalog is empty, returning how many were
    /// written.
    ///
    /// The emptiness check runs once per service; later calls return 0.
    pub async fn ensure_seeded(&self, products: Vec<Product>) -> Result<usize, DomainError> {
        if self.seeded.load(Ordering::Acquire) {
            return Ok(0);
        }

        if !self.is_empty().await? {
            self.seeded.store(true, Ordering::Release);
            debug!("Product catalog already populated");
            return Ok(0);
        }

        let count = products.len();

        for product in &products {
            self.store.upsert(product).await?;
        }

        self.seeded.store(true, Ordering::Release);
        info!(products = count, "Product catalog seeded");

        Ok(count)
    }
}
