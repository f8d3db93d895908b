//! Semantic cache domain models
//!
//! Cache entries are keyed by the meaning of a prompt (its embedding vector)
//! rather than its exact text.

mod entity;
mod stats;

pub use entity::CacheItem;
pub use stats::SemanticCacheStats;
