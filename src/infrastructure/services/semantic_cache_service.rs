//! Semantic completion cache over a document container
//!
//! Cache keys are embedding vectors. A lookup returns the completion of the
//! single nearest item whose similarity exceeds the caller's threshold.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::domain::document_store::{
    DocumentStore, DocumentStoreExt, PartitionKey, Query, QueryPager,
};
use crate::domain::semantic_cache::{CacheItem, SemanticCacheStats};
use crate::domain::similarity::EXACT_MATCH_THRESHOLD;
use crate::domain::DomainError;
use crate::infrastructure::metrics;

const VECTOR_FIELD: &str = "vector";

/// Semantic cache service
///
/// No cross-call locking: concurrent `put`s with the same id are
/// last-write-wins and a `get` may or may not observe a racing write.
///
/// Without a configured dimensionality the first successful `put` pins it
/// until the next successful `clear`. The pin is per instance, so items
/// stored by an earlier process are not checked against it.
#[derive(Debug)]
pub struct SemanticCacheService {
    store: Arc<dyn DocumentStore>,
    dimensions: Option<usize>,
    /// Dimensionality of the first stored vector, 0 while unknown
    pinned: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    cleared: AtomicU64,
}

impl SemanticCacheService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            dimensions: None,
            pinned: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            cleared: AtomicU64::new(0),
        }
    }

    /// Require every vector to have exactly `dimensions` components
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), DomainError> {
        if vector.is_empty() {
            return Err(DomainError::invalid_argument(
                "Cache vector must not be empty",
            ));
        }

        let pinned = Some(self.pinned.load(Ordering::Acquire)).filter(|&d| d > 0);

        match self.dimensions.or(pinned) {
            Some(expected) if expected != vector.len() => {
                Err(DomainError::invalid_argument(format!(
                    "Cache vector has {} dimensions, expected {}",
                    vector.len(),
                    expected
                )))
            }
            _ => Ok(()),
        }
    }

    /// Nearest item above `threshold`
    fn nearest(vector: &[f32], threshold: f32) -> Query {
        Query::new()
            .with_vector_rank(VECTOR_FIELD, vector.to_vec())
            .with_min_score(threshold)
            .with_limit(1)
    }

    /// Completion of the nearest cached item scoring above `threshold`
    pub async fn get(&self, vector: &[f32], threshold: f32) -> Result<Option<String>, DomainError> {
        self.check_vector(vector)?;

        let started = Instant::now();
        let query = Self::nearest(vector, threshold).with_fields(&["completion"]);
        let page = self.store.query_page(&query, None).await?;

        let hit = page.rows.into_iter().next().and_then(|row| {
            let score = row.score;
            row.document
                .get("completion")
                .and_then(|c| c.as_str())
                .map(|c| (c.to_string(), score))
        });

        metrics::record_cache_lookup(hit.is_some(), started.elapsed());

        match hit {
            Some((completion, score)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(score = ?score, threshold, "Semantic cache hit");
                Ok(Some(completion))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(threshold, "Semantic cache miss");
                Ok(None)
            }
        }
    }

    /// Insert or fully replace an item by id
    pub async fn put(&self, item: &CacheItem) -> Result<(), DomainError> {
        self.check_vector(item.vector())?;

        self.store.upsert(item).await?;
        self.puts.fetch_add(1, Ordering::Relaxed);

        if self.dimensions.is_none() {
            let _ = self.pinned.compare_exchange(
                0,
                item.vector().len(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        debug!(id = item.id(), "Cached completion");
        Ok(())
    }

    /// Delete the single item that is effectively identical to `vector`.
    ///
    /// Returns false when nothing scores above the exact-match threshold.
    pub async fn remove(&self, vector: &[f32]) -> Result<bool, DomainError> {
        self.check_vector(vector)?;

        let query = Self::nearest(vector, EXACT_MATCH_THRESHOLD).with_value("id");
        let page = self.store.query_page(&query, None).await?;

        let Some(id) = page
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.document.as_str().map(str::to_string))
        else {
            return Ok(false);
        };

        let deleted = self.store.delete_item(&PartitionKey::new(&id), &id).await?;

        if deleted {
            self.removals.fetch_add(1, Ordering::Relaxed);
            debug!(id = %id, "Removed cached completion");
        }

        Ok(deleted)
    }

    /// Delete every cached item, returning how many were deleted.
    ///
    /// Items are deleted page by page as the drain proceeds. A failure stops
    /// the drain and leaves the items deleted so far deleted.
    pub async fn clear(&self) -> Result<usize, DomainError> {
        let mut pager = QueryPager::new(self.store.as_ref(), Query::new().with_value("id"));
        let mut deleted = 0usize;

        let result = async {
            while let Some(rows) = pager.next_page().await? {
                for row in rows {
                    let Some(id) = row.document.as_str() else {
                        continue;
                    };

                    if self.store.delete_item(&PartitionKey::new(id), id).await? {
                        deleted += 1;
                    }
                }
            }

            Ok::<(), DomainError>(())
        }
        .await;

        self.cleared.fetch_add(deleted as u64, Ordering::Relaxed);

        match result {
            Ok(()) => {
                self.pinned.store(0, Ordering::Release);
                info!(deleted, "Semantic cache cleared");
                Ok(deleted)
            }
            Err(e) => {
                warn!(deleted, error = %e, "Semantic cache clear stopped partway");
                Err(e)
            }
        }
    }

    /// Snapshot of the service counters
    pub fn stats(&self) -> SemanticCacheStats {
        SemanticCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document_store::{ContainerSpec, MockDocumentStore, QueryPage, QueryRow};
    use crate::infrastructure::document_store::InMemoryDocumentStore;
    use mockall::predicate::{always, eq};
    use serde_json::json;

    fn service() -> SemanticCacheService {
        let container = ContainerSpec::new("cache", "/id").unwrap();
        SemanticCacheService::new(Arc::new(InMemoryDocumentStore::new(container)))
    }

    fn paged_service(page_size: usize) -> SemanticCacheService {
        let container = ContainerSpec::new("cache", "/id").unwrap();
        SemanticCacheService::new(Arc::new(
            InMemoryDocumentStore::new(container).with_page_size(page_size),
        ))
    }

    #[tokio::test]
    async fn test_put_then_get_same_vector() {
        let cache = service();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "C"))
            .await
            .unwrap();

        assert_eq!(
            cache.get(&[1.0, 0.0], 0.5).await.unwrap(),
            Some("C".to_string())
        );
        assert_eq!(cache.get(&[0.0, 1.0], 0.5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_on_empty_store_misses() {
        let cache = service();

        assert_eq!(cache.get(&[1.0, 0.0], -1.0).await.unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_get_returns_nearest_above_threshold() {
        let cache = service();
        cache
            .put(&CacheItem::new("far", vec![0.6, 0.8], "p", "far"))
            .await
            .unwrap();
        cache
            .put(&CacheItem::new("near", vec![0.95, 0.05], "p", "near"))
            .await
            .unwrap();

        assert_eq!(
            cache.get(&[1.0, 0.0], 0.5).await.unwrap(),
            Some("near".to_string())
        );
        // far scores about 0.6 against the query
        assert!(cache.remove(&[0.95, 0.05]).await.unwrap());
        assert_eq!(cache.get(&[1.0, 0.0], 0.65).await.unwrap(), None);
        assert_eq!(
            cache.get(&[1.0, 0.0], 0.55).await.unwrap(),
            Some("far".to_string())
        );
    }

    #[tokio::test]
    async fn test_put_replaces_by_id() {
        let cache = service();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "old"))
            .await
            .unwrap();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "new"))
            .await
            .unwrap();

        assert_eq!(
            cache.get(&[1.0, 0.0], 0.5).await.unwrap(),
            Some("new".to_string())
        );
        assert_eq!(cache.clear().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_exact_match() {
        let cache = service();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "C"))
            .await
            .unwrap();

        assert!(cache.remove(&[1.0, 0.0]).await.unwrap());
        assert_eq!(cache.get(&[1.0, 0.0], 0.5).await.unwrap(), None);
        assert!(!cache.remove(&[1.0, 0.0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_ignores_near_but_not_identical() {
        let cache = service();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "C"))
            .await
            .unwrap();

        assert!(!cache.remove(&[0.8, 0.6]).await.unwrap());
        assert_eq!(
            cache.get(&[1.0, 0.0], 0.5).await.unwrap(),
            Some("C".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear_drains_multiple_pages() {
        let cache = paged_service(2);

        for i in 0..5 {
            cache
                .put(&CacheItem::new(format!("c{}", i), vec![1.0, i as f32], "p", "c"))
                .await
                .unwrap();
        }

        assert_eq!(cache.clear().await.unwrap(), 5);
        assert_eq!(cache.get(&[1.0, 0.0], -1.0).await.unwrap(), None);
        assert_eq!(cache.stats().cleared, 5);
    }

    #[tokio::test]
    async fn test_clear_deletes_each_id_once() {
        let mut store = MockDocumentStore::new();

        store
            .expect_query_page()
            .with(always(), eq(None))
            .times(1)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![
                        QueryRow { document: json!("a"), score: None },
                        QueryRow { document: json!("b"), score: None },
                    ],
                    continuation: Some("next".to_string()),
                })
            });
        store
            .expect_query_page()
            .with(always(), eq(Some("next".to_string())))
            .times(1)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![QueryRow { document: json!("c"), score: None }],
                    continuation: None,
                })
            });

        for id in ["a", "b", "c"] {
            store
                .expect_delete_item()
                .withf(move |pk, item_id| pk.as_str() == id && item_id == id)
                .times(1)
                .returning(|_, _| Ok(true));
        }

        let cache = SemanticCacheService::new(Arc::new(store));

        assert_eq!(cache.clear().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_clear_failure_keeps_partial_progress() {
        let mut store = MockDocumentStore::new();

        store
            .expect_query_page()
            .with(always(), eq(None))
            .times(1)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![QueryRow { document: json!("a"), score: None }],
                    continuation: Some("next".to_string()),
                })
            });
        store
            .expect_query_page()
            .with(always(), eq(Some("next".to_string())))
            .times(1)
            .returning(|_, _| Err(DomainError::storage("unavailable")));
        store
            .expect_delete_item()
            .times(1)
            .returning(|_, _| Ok(true));

        let cache = SemanticCacheService::new(Arc::new(store));
        let err = cache.clear().await.unwrap_err();

        assert!(matches!(err, DomainError::Storage { .. }));
        assert_eq!(cache.stats().cleared, 1);
    }

    #[tokio::test]
    async fn test_dimension_validation() {
        let cache = service().with_dimensions(3);

        let err = cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "C"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        assert!(cache.get(&[1.0], 0.5).await.unwrap_err().is_invalid_argument());
        assert!(cache.get(&[], 0.5).await.is_err());
    }

    #[tokio::test]
    async fn test_first_put_pins_dimensions_until_clear() {
        let cache = service();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "C"))
            .await
            .unwrap();

        let err = cache
            .put(&CacheItem::new("c2", vec![1.0, 0.0, 0.0], "P", "C"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        assert_eq!(
            cache.get(&[1.0, 0.0], 0.5).await.unwrap(),
            Some("C".to_string())
        );
        assert!(cache.get(&[1.0, 0.0, 0.0], 0.5).await.is_err());

        assert_eq!(cache.clear().await.unwrap(), 1);

        cache
            .put(&CacheItem::new("c3", vec![0.0, 0.0, 1.0], "P", "D"))
            .await
            .unwrap();
        assert_eq!(
            cache.get(&[0.0, 0.0, 1.0], 0.5).await.unwrap(),
            Some("D".to_string())
        );
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = service();
        cache
            .put(&CacheItem::new("c1", vec![1.0, 0.0], "P", "C"))
            .await
            .unwrap();

        cache.get(&[1.0, 0.0], 0.5).await.unwrap();
        cache.get(&[0.0, 1.0], 0.5).await.unwrap();
        cache.get(&[1.0, 0.0], 0.5).await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
    }
}
