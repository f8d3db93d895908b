//! Document store domain - partitioned JSON containers with vector-ranked
//! queries and single-partition transactional batches

mod batch;
mod partition;
mod query;
mod store;

pub use batch::{BatchLimits, BatchOperation, BatchResponse, TransactionalBatch};
pub use partition::{document_id, ContainerSpec, PartitionKey, PartitionKeyPath};
pub use query::{
    Continuation, FieldFilter, Projection, Query, QueryPage, QueryRow, VectorRank,
};
pub use store::{from_document, to_document, DocumentStore, DocumentStoreExt, QueryPager};

#[cfg(test)]
pub use store::MockDocumentStore;
