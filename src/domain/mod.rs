//! Domain layer - entities, the document store contract and similarity scoring

pub mod catalog;
pub mod chat;
pub mod document_store;
pub mod error;
pub mod semantic_cache;
pub mod similarity;

pub use error::DomainError;
