//! Store metrics recorded through the `metrics` facade
//!
//! Nothing is exported unless the embedding application installs a recorder.

use std::time::Duration;

use metrics::{counter, histogram};

/// Record a semantic cache lookup
pub fn record_cache_lookup(hit: bool, duration: Duration) {
    let result = if hit { "hit" } else { "miss" };

    counter!("semantic_cache_lookups_total", "result" => result).increment(1);
    histogram!("semantic_cache_lookup_duration_seconds").record(duration.as_secs_f64());
}

/// Record a transactional batch execution
pub fn record_batch(container: &str, committed: bool, operations: usize) {
    let status = if committed { "committed" } else { "rejected" };
    let labels = [
        ("container", container.to_string()),
        ("status", status.to_string()),
    ];

    counter!("document_store_batches_total", &labels).increment(1);
    histogram!("document_store_batch_operations", &labels).record(operations as f64);
}

/// Record a vector search
pub fn record_vector_search(container: &str, results: usize, duration: Duration) {
    let labels = [("container", container.to_string())];

    counter!("vector_search_requests_total", &labels).increment(1);
    histogram!("vector_search_results", &labels).record(results as f64);
    histogram!("vector_search_duration_seconds", &labels).record(duration.as_secs_f64());
}
