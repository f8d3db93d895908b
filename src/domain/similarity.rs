//! Vector similarity scoring
//!
//! Cosine similarity between embedding vectors, plus the threshold rule used
//! by every vector lookup in the crate.

use crate::domain::DomainError;

/// Scores above this are treated as "the same item"
pub const EXACT_MATCH_THRESHOLD: f32 = 0.99;

/// Cosine similarity between two vectors of equal, non-zero length.
///
/// Returns a value in `[-1.0, 1.0]`: `0.0` for orthogonal vectors and values
/// approaching `1.0` for identical directions. A zero-magnitude vector scores
/// `0.0` against anything.
///
/// # Panics
///
/// Panics if the vectors are empty or differ in length. Use
/// [`check_dimensions`] first when the inputs come from stored data.
pub fn score(a: &[f32], b: &[f32]) -> f32 {
    assert!(!a.is_empty(), "similarity score requires non-empty vectors");
    assert_eq!(
        a.len(),
        b.len(),
        "similarity score requires vectors of equal dimensionality"
    );

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Strict threshold rule: a score matches only if it exceeds the threshold
pub fn matches(score: f32, threshold: f32) -> bool {
    score > threshold
}

/// Non-panicking dimensionality guard for vectors read from a store
pub fn check_dimensions(query: &[f32], candidate: &[f32]) -> Result<(), DomainError> {
    if query.is_empty() {
        return Err(DomainError::invalid_argument(
            "Query vector must not be empty",
        ));
    }

    if query.len() != candidate.len() {
        return Err(DomainError::invalid_argument(format!(
            "Vector dimensionality mismatch: query has {}, candidate has {}",
            query.len(),
            candidate.len()
        )));
    }

    Ok(())
}
