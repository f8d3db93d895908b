//! Product entity and search result payload

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Fields returned by product search; storage identifiers are left out
pub const PRODUCT_SEARCH_FIELDS: [&str; 6] =
    ["categoryName", "sku", "name", "description", "price", "tags"];

/// A catalog product, partitioned by `categoryId`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub category_id: String,
    pub category_name: String,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        category_id: impl Into<String>,
        category_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category_id: category_id.into(),
            category_name: category_name.into(),
            sku: String::new(),
            name: name.into(),
            description: String::new(),
            price: 0.0,
            tags: BTreeSet::new(),
            vector: Vec::new(),
        }
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = sku.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }
}

/// Product fields needed to ground a generated answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSearchResult {
    pub category_name: String,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Similarity of the product vector to the query vector
    #[serde(default)]
    pub similarity_score: f32,
}
