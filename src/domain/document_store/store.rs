//! Document store trait and paging helpers

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use super::batch::{BatchResponse, TransactionalBatch};
use super::partition::PartitionKey;
use super::query::{Query, QueryPage, QueryRow};
use crate::domain::DomainError;

/// A partitioned container of JSON documents
///
/// Every document carries a string `id`; its partition key is read from the
/// document through the container's partition key path. Identity is the
/// `(partition key, id)` pair.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Point read by identity
    async fn read_item(
        &self,
        partition_key: &PartitionKey,
        id: &str,
    ) -> Result<Option<Value>, DomainError>;

    /// Insert a new document, `Conflict` if it already exists
    async fn create_item(&self, document: Value) -> Result<Value, DomainError>;

    /// Replace an existing document, `NotFound` if absent
    async fn replace_item(&self, id: &str, document: Value) -> Result<Value, DomainError>;

    /// Insert or fully replace a document
    async fn upsert_item(&self, document: Value) -> Result<Value, DomainError>;

    /// Delete by identity, returns true if something was deleted
    async fn delete_item(&self, partition_key: &PartitionKey, id: &str)
        -> Result<bool, DomainError>;

    /// Fetch one page of query results
    async fn query_page(
        &self,
        query: &Query,
        continuation: Option<String>,
    ) -> Result<QueryPage, DomainError>;

    /// Apply every operation of the batch, or none of them
    async fn execute_batch(&self, batch: TransactionalBatch) -> Result<BatchResponse, DomainError>;
}

/// Extension trait providing typed document operations
pub trait DocumentStoreExt: DocumentStore {
    /// Reads and deserializes a document
    fn read<'a, T>(
        &'a self,
        partition_key: &'a PartitionKey,
        id: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<T>, DomainError>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            match self.read_item(partition_key, id).await? {
                Some(document) => Ok(Some(from_document(document)?)),
                None => Ok(None),
            }
        }
    }

    /// Serializes and creates a document
    fn create<'a, T>(
        &'a self,
        item: &'a T,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        T: Serialize + Sync,
    {
        async move {
            self.create_item(to_document(item)?).await?;
            Ok(())
        }
    }

    /// Serializes and replaces a document
    fn replace<'a, T>(
        &'a self,
        id: &'a str,
        item: &'a T,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        T: Serialize + Sync,
    {
        async move {
            self.replace_item(id, to_document(item)?).await?;
            Ok(())
        }
    }

    /// Serializes and upserts a document
    fn upsert<'a, T>(
        &'a self,
        item: &'a T,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        T: Serialize + Sync,
    {
        async move {
            self.upsert_item(to_document(item)?).await?;
            Ok(())
        }
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

/// Serialize an entity into a store document
pub fn to_document<T: Serialize + ?Sized>(item: &T) -> Result<Value, DomainError> {
    serde_json::to_value(item).map_err(|e| {
        DomainError::serialization(format!("Failed to serialize document: {}", e))
    })
}

/// Deserialize a store document into an entity
pub fn from_document<T: DeserializeOwned>(document: Value) -> Result<T, DomainError> {
    serde_json::from_value(document).map_err(|e| {
        DomainError::serialization(format!("Failed to deserialize document: {}", e))
    })
}

/// Sequential drain over a paged query
///
/// Page N+1 is only requested after page N has been returned to the caller.
/// A failed page ends the drain; nothing already consumed is undone.
pub struct QueryPager<'a> {
    store: &'a dyn DocumentStore,
    query: Query,
    continuation: Option<String>,
    exhausted: bool,
    pages_fetched: usize,
}

impl<'a> QueryPager<'a> {
    pub fn new(store: &'a dyn DocumentStore, query: Query) -> Self {
        Self {
            store,
            query,
            continuation: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    pub fn has_more_results(&self) -> bool {
        !self.exhausted
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the result set is exhausted.
    ///
    /// Pages may be empty while more results remain.
    pub async fn next_page(&mut self) -> Result<Option<Vec<QueryRow>>, DomainError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .store
            .query_page(&self.query, self.continuation.take())
            .await?;

        self.pages_fetched += 1;
        self.exhausted = page.continuation.is_none();
        self.continuation = page.continuation;

        Ok(Some(page.rows))
    }

    /// Drain every page into one vector
    pub async fn collect_all(mut self) -> Result<Vec<QueryRow>, DomainError> {
        let mut rows = Vec::new();

        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }

        Ok(rows)
    }

    /// Drain every page, deserializing each row
    pub async fn collect_typed<T: DeserializeOwned>(self) -> Result<Vec<T>, DomainError> {
        self.collect_all()
            .await?
            .into_iter()
            .map(QueryRow::into_typed)
            .collect()
    }
}

impl Debug for QueryPager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPager")
            .field("query", &self.query)
            .field("exhausted", &self.exhausted)
            .field("pages_fetched", &self.pages_fetched)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use serde_json::json;

    fn row(id: &str) -> QueryRow {
        QueryRow {
            document: json!({ "id": id }),
            score: None,
        }
    }

    #[tokio::test]
    async fn test_pager_requests_pages_in_sequence() {
        let mut store = MockDocumentStore::new();
        let mut seq = Sequence::new();

        store
            .expect_query_page()
            .with(mockall::predicate::always(), eq(None))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![row("1"), row("2")],
                    continuation: Some("page-2".to_string()),
                })
            });
        store
            .expect_query_page()
            .with(mockall::predicate::always(), eq(Some("page-2".to_string())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![],
                    continuation: Some("page-3".to_string()),
                })
            });
        store
            .expect_query_page()
            .with(mockall::predicate::always(), eq(Some("page-3".to_string())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![row("3")],
                    continuation: None,
                })
            });

        let pager = QueryPager::new(&store, Query::new());
        let rows = pager.collect_all().await.unwrap();

        assert_eq!(rows, vec![row("1"), row("2"), row("3")]);
    }

    #[tokio::test]
    async fn test_pager_stops_on_error() {
        let mut store = MockDocumentStore::new();

        store
            .expect_query_page()
            .times(1)
            .returning(|_, _| Err(DomainError::storage("unavailable")));

        let mut pager = QueryPager::new(&store, Query::new());

        assert!(pager.next_page().await.is_err());
        assert_eq!(pager.pages_fetched(), 0);
    }

    #[tokio::test]
    async fn test_typed_read_missing_item() {
        let mut store = MockDocumentStore::new();

        store
            .expect_read_item()
            .times(1)
            .returning(|_, _| Ok(None));

        let pk = PartitionKey::new("p");
        let result: Option<Value> = store.read(&pk, "missing").await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_typed_upsert_serializes() {
        #[derive(Serialize)]
        struct Item {
            id: String,
        }

        let mut store = MockDocumentStore::new();

        store
            .expect_upsert_item()
            .withf(|doc| doc == &json!({"id": "x"}))
            .times(1)
            .returning(Ok);

        store
            .upsert(&Item {
                id: "x".to_string(),
            })
            .await
            .unwrap();
    }
}
