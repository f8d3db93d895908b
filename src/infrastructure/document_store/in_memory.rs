//! In-memory document store implementation

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::document_store::{
    BatchLimits, BatchOperation, BatchResponse, ContainerSpec, Continuation, DocumentStore,
    PartitionKey, Query, QueryPage, QueryRow, TransactionalBatch,
};
use crate::domain::DomainError;
use crate::infrastructure::metrics;

type ItemKey = (PartitionKey, String);

/// Default number of rows per query page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Thread-safe in-memory container
///
/// Natural order is `(partition key, id)`. Useful for testing and
/// development. Data is lost when the process terminates.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    container: ContainerSpec,
    page_size: usize,
    limits: BatchLimits,
    documents: RwLock<BTreeMap<ItemKey, Value>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty container
    pub fn new(container: ContainerSpec) -> Self {
        Self {
            container,
            page_size: DEFAULT_PAGE_SIZE,
            limits: BatchLimits::default(),
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Sets the maximum number of rows per query page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets batch and item size limits
    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn container(&self) -> &ContainerSpec {
        &self.container
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn keyed(&self, document: &Value) -> Result<ItemKey, DomainError> {
        self.limits.check_item_size(document)?;
        self.container.identify(document)
    }

    fn stream_page(
        &self,
        documents: &BTreeMap<ItemKey, Value>,
        query: &Query,
        continuation: Option<&str>,
    ) -> Result<QueryPage, DomainError> {
        let lower = match Continuation::after(continuation)? {
            Some((partition_key, id)) => Bound::Excluded((PartitionKey::new(partition_key), id)),
            None => Bound::Unbounded,
        };

        let mut entries = documents.range((lower, Bound::Unbounded));
        let mut rows: Vec<QueryRow> = Vec::new();
        let mut last_key: Option<&ItemKey> = None;

        for (key, document) in entries.by_ref() {
            if !query.matches(&key.0, document) {
                continue;
            }

            rows.push(query.project(document, None));
            last_key = Some(key);

            if rows.len() >= self.page_size {
                break;
            }
        }

        let more = rows.len() >= self.page_size && entries.next().is_some();

        let continuation = match last_key {
            Some((partition_key, id)) if more => Some(
                Continuation::After {
                    partition_key: partition_key.as_str().to_string(),
                    id: id.clone(),
                }
                .encode()?,
            ),
            _ => None,
        };

        Ok(QueryPage { rows, continuation })
    }

    async fn apply_batch(&self, batch: &TransactionalBatch) -> Result<BatchResponse, DomainError> {
        batch.validate(&self.container, &self.limits)?;

        let mut documents = self.documents.write().await;
        let staged = Self::stage(&documents, batch)?;
        let partition_key = batch.partition_key().clone();

        for (id, state) in staged {
            let key = (partition_key.clone(), id);

            match state {
                Some(document) => {
                    documents.insert(key, document);
                }
                None => {
                    documents.remove(&key);
                }
            }
        }

        Ok(BatchResponse {
            partition_key,
            operation_count: batch.len(),
        })
    }

    /// Stage every operation against the current contents without writing
    fn stage(
        documents: &BTreeMap<ItemKey, Value>,
        batch: &TransactionalBatch,
    ) -> Result<HashMap<String, Option<Value>>, DomainError> {
        let partition_key = batch.partition_key();
        let mut staged: HashMap<String, Option<Value>> = HashMap::new();

        for (index, operation) in batch.operations().iter().enumerate() {
            let id = operation.id()?;
            let exists = match staged.get(&id) {
                Some(state) => state.is_some(),
                None => documents.contains_key(&(partition_key.clone(), id.clone())),
            };

            match operation {
                BatchOperation::Create(document) => {
                    if exists {
                        return Err(DomainError::conflict(format!(
                            "Batch operation {} (create): item '{}' already exists",
                            index, id
                        )));
                    }
                    staged.insert(id, Some(document.clone()));
                }
                BatchOperation::Replace(document) => {
                    if !exists {
                        return Err(DomainError::not_found(format!(
                            "Batch operation {} (replace): item '{}' not found",
                            index, id
                        )));
                    }
                    staged.insert(id, Some(document.clone()));
                }
                BatchOperation::Upsert(document) => {
                    staged.insert(id, Some(document.clone()));
                }
                BatchOperation::Delete { .. } => {
                    if !exists {
                        return Err(DomainError::not_found(format!(
                            "Batch operation {} (delete): item '{}' not found",
                            index, id
                        )));
                    }
                    staged.insert(id, None);
                }
            }
        }

        Ok(staged)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn read_item(
        &self,
        partition_key: &PartitionKey,
        id: &str,
    ) -> Result<Option<Value>, DomainError> {
        let documents = self.documents.read().await;

        Ok(documents
            .get(&(partition_key.clone(), id.to_string()))
            .cloned())
    }

    async fn create_item(&self, document: Value) -> Result<Value, DomainError> {
        let key = self.keyed(&document)?;
        let mut documents = self.documents.write().await;

        if documents.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "Item '{}' already exists in partition '{}' of '{}'",
                key.1,
                key.0,
                self.container.name()
            )));
        }

        documents.insert(key, document.clone());
        Ok(document)
    }

    async fn replace_item(&self, id: &str, document: Value) -> Result<Value, DomainError> {
        let key = self.keyed(&document)?;

        if key.1 != id {
            return Err(DomainError::invalid_argument(format!(
                "Replacement document id '{}' does not match '{}'",
                key.1, id
            )));
        }

        let mut documents = self.documents.write().await;

        if !documents.contains_key(&key) {
            return Err(DomainError::not_found(format!(
                "Item '{}' not found in partition '{}' of '{}'",
                id,
                key.0,
                self.container.name()
            )));
        }

        documents.insert(key, document.clone());
        Ok(document)
    }

    async fn upsert_item(&self, document: Value) -> Result<Value, DomainError> {
        let key = self.keyed(&document)?;
        let mut documents = self.documents.write().await;

        documents.insert(key, document.clone());
        Ok(document)
    }

    async fn delete_item(
        &self,
        partition_key: &PartitionKey,
        id: &str,
    ) -> Result<bool, DomainError> {
        let mut documents = self.documents.write().await;

        Ok(documents
            .remove(&(partition_key.clone(), id.to_string()))
            .is_some())
    }

    async fn query_page(
        &self,
        query: &Query,
        continuation: Option<String>,
    ) -> Result<QueryPage, DomainError> {
        query.validate()?;

        let documents = self.documents.read().await;

        let page = if query.is_streamable() {
            self.stream_page(&documents, query, continuation.as_deref())?
        } else {
            let rows = query.materialize(documents.iter().map(|((pk, _), doc)| (pk, doc)))?;
            let offset = Continuation::offset(continuation.as_deref())?;
            QueryPage::from_materialized(rows, offset, self.page_size)?
        };

        debug!(
            container = self.container.name(),
            rows = page.rows.len(),
            has_more = page.continuation.is_some(),
            "Query page served"
        );

        Ok(page)
    }

    async fn execute_batch(&self, batch: TransactionalBatch) -> Result<BatchResponse, DomainError> {
        let result = self.apply_batch(&batch).await;

        metrics::record_batch(self.container.name(), result.is_ok(), batch.len());
        result
    }
}
