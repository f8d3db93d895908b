//! Cache item stored in the semantic cache container

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cached completion keyed by the embedding of its prompt
///
/// Partitioned by its own `id`. Writes are whole-item upserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    id: String,
    vector: Vec<f32>,
    prompt: String,
    completion: String,
}

impl CacheItem {
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        prompt: impl Into<String>,
        completion: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            vector,
            prompt: prompt.into(),
            completion: completion.into(),
        }
    }

    /// Create an item with a fresh random id
    pub fn with_generated_id(
        vector: Vec<f32>,
        prompt: impl Into<String>,
        completion: impl Into<String>,
    ) -> Self {
        Self::new(Uuid::new_v4().to_string(), vector, prompt, completion)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn completion(&self) -> &str {
        &self.completion
    }
}
