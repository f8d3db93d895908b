//! Store services built on document containers

mod chat_session_service;
mod product_search_service;
mod semantic_cache_service;

pub use chat_session_service::ChatSessionService;
pub use product_search_service::{ProductSearchService, DEFAULT_MAX_RESULTS, DEFAULT_MIN_SCORE};
pub use semantic_cache_service::SemanticCacheService;
