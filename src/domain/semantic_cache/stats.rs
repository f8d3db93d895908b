use serde::{Deserialize, Serialize};

/// Counters kept by the semantic cache service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticCacheStats {
    /// Lookups that returned a completion
    pub hits: u64,
    /// Lookups that found nothing above the threshold
    pub misses: u64,
    /// Items written through `put`
    pub puts: u64,
    /// Items deleted through `remove`
    pub removals: u64,
    /// Items deleted through `clear`
    pub cleared: u64,
}

impl SemanticCacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;

        if total == 0 {
            return 0.0;
        }

        self.hits as f32 / total as f32
    }
}
