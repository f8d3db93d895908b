//! Product catalog domain - products searchable by vector similarity

mod product;

pub use product::{Product, ProductSearchResult, PRODUCT_SEARCH_FIELDS};
