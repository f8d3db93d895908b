//! Transactional batches scoped to a single partition

use serde_json::Value;

use super::partition::{document_id, ContainerSpec, PartitionKey};
use crate::domain::DomainError;

/// A single write inside a transactional batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    /// Insert; fails if the id already exists in the partition
    Create(Value),
    /// Replace; fails if the id does not exist in the partition
    Replace(Value),
    /// Insert or replace
    Upsert(Value),
    /// Delete; fails if the id does not exist in the partition
    Delete { id: String },
}

impl BatchOperation {
    /// Id targeted by this operation
    pub fn id(&self) -> Result<String, DomainError> {
        match self {
            Self::Create(doc) | Self::Replace(doc) | Self::Upsert(doc) => document_id(doc),
            Self::Delete { id } => Ok(id.clone()),
        }
    }

    /// Document written by this operation, if any
    pub fn document(&self) -> Option<&Value> {
        match self {
            Self::Create(doc) | Self::Replace(doc) | Self::Upsert(doc) => Some(doc),
            Self::Delete { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Replace(_) => "replace",
            Self::Upsert(_) => "upsert",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Group of writes that commit atomically within one partition
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionalBatch {
    partition_key: PartitionKey,
    operations: Vec<BatchOperation>,
}

impl TransactionalBatch {
    pub fn new(partition_key: impl Into<PartitionKey>) -> Self {
        Self {
            partition_key: partition_key.into(),
            operations: Vec::new(),
        }
    }

    pub fn create_item(mut self, document: Value) -> Self {
        self.operations.push(BatchOperation::Create(document));
        self
    }

    pub fn replace_item(mut self, document: Value) -> Self {
        self.operations.push(BatchOperation::Replace(document));
        self
    }

    pub fn upsert_item(mut self, document: Value) -> Self {
        self.operations.push(BatchOperation::Upsert(document));
        self
    }

    pub fn delete_item(mut self, id: impl Into<String>) -> Self {
        self.operations.push(BatchOperation::Delete { id: id.into() });
        self
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<BatchOperation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Checks every store backend runs before writing anything
    pub fn validate(&self, container: &ContainerSpec, limits: &BatchLimits) -> Result<(), DomainError> {
        if self.operations.is_empty() {
            return Err(DomainError::invalid_argument(
                "Transactional batch must contain at least one operation",
            ));
        }

        if self.operations.len() > limits.max_operations {
            return Err(DomainError::invalid_argument(format!(
                "Transactional batch has {} operations (max {})",
                self.operations.len(),
                limits.max_operations
            )));
        }

        for operation in &self.operations {
            operation.id()?;

            let Some(document) = operation.document() else {
                continue;
            };

            let partition_key = container.partition_key_path().extract(document)?;

            if partition_key != self.partition_key {
                return Err(DomainError::invalid_argument(format!(
                    "All items in a batch must share partition key '{}', found '{}'",
                    self.partition_key, partition_key
                )));
            }

            limits.check_item_size(document)?;
        }

        Ok(())
    }
}

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub partition_key: PartitionKey,
    pub operation_count: usize,
}

/// Size limits enforced by store backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_operations: usize,
    pub max_item_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_operations: 100,
            max_item_bytes: 2 * 1024 * 1024,
        }
    }
}

impl BatchLimits {
    /// Reject documents whose serialized form exceeds the item size limit
    pub fn check_item_size(&self, document: &Value) -> Result<(), DomainError> {
        let size = serde_json::to_vec(document)?.len();

        if size > self.max_item_bytes {
            return Err(DomainError::invalid_argument(format!(
                "Item is {} bytes (max {})",
                size, self.max_item_bytes
            )));
        }

        Ok(())
    }
}
