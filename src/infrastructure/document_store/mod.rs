//! Document store backends

mod factory;
mod in_memory;
mod postgres;

pub use factory::{StorageType, StoreFactory};
pub use in_memory::{InMemoryDocumentStore, DEFAULT_PAGE_SIZE};
pub use postgres::{PostgresConfig, PostgresDocumentStore};
