//! Query expressions over JSON documents
//!
//! A [`Query`] is the backend-neutral form of a document query: partition
//! scope, equality filters, optional vector ranking with a score floor, TOP-N
//! limit, projection and DISTINCT. Backends share the evaluation helpers here
//! so that every store ranks and projects identically.

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::partition::PartitionKey;
use crate::domain::similarity;
use crate::domain::DomainError;

/// Which parts of a matching document are returned
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// The whole document
    #[default]
    All,
    /// An object holding only the listed fields
    Fields(Vec<String>),
    /// The bare value of a single field
    Value(String),
}

/// Equality condition on a document field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

/// Rank documents by similarity of a vector field to a query vector
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRank {
    pub field: String,
    pub vector: Vec<f32>,
}

/// Backend-neutral document query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    partition_key: Option<PartitionKey>,
    filters: Vec<FieldFilter>,
    vector_rank: Option<VectorRank>,
    min_score: Option<f32>,
    limit: Option<usize>,
    projection: Projection,
    distinct: bool,
}

impl Query {
    /// Query over every document in the container
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the query to a single partition
    pub fn with_partition_key(mut self, partition_key: impl Into<PartitionKey>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    /// Add an equality filter; filters are combined with AND
    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Rank results by similarity of `field` to `vector`, highest first
    pub fn with_vector_rank(mut self, field: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vector_rank = Some(VectorRank {
            field: field.into(),
            vector,
        });
        self
    }

    /// Keep only ranked results scoring strictly above `min_score`
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Return at most `limit` results (TOP N)
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Project onto the given fields
    pub fn with_fields(self, fields: &[&str]) -> Self {
        self.with_projection(Projection::Fields(
            fields.iter().map(|f| f.to_string()).collect(),
        ))
    }

    /// Project onto the bare value of one field
    pub fn with_value(self, field: impl Into<String>) -> Self {
        self.with_projection(Projection::Value(field.into()))
    }

    /// Drop duplicate projected rows
    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn partition_key(&self) -> Option<&PartitionKey> {
        self.partition_key.as_ref()
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn vector_rank(&self) -> Option<&VectorRank> {
        self.vector_rank.as_ref()
    }

    pub fn min_score(&self) -> Option<f32> {
        self.min_score
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Reject queries that cannot be evaluated
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(rank) = &self.vector_rank {
            if rank.vector.is_empty() {
                return Err(DomainError::invalid_argument(
                    "Query vector must not be empty",
                ));
            }
        } else if self.min_score.is_some() {
            return Err(DomainError::invalid_argument(
                "A minimum score requires a vector ranking",
            ));
        }

        Ok(())
    }

    /// Whether results can be paged in natural order without materializing
    /// the full result set first
    pub fn is_streamable(&self) -> bool {
        self.vector_rank.is_none() && self.limit.is_none() && !self.distinct
    }

    /// Partition scope and equality filters
    pub fn matches(&self, partition_key: &PartitionKey, document: &Value) -> bool {
        if let Some(scope) = &self.partition_key {
            if scope != partition_key {
                return false;
            }
        }

        self.filters
            .iter()
            .all(|f| lookup(document, &f.field) == Some(&f.value))
    }

    /// Similarity of the document to the ranking vector.
    ///
    /// `Ok(None)` when the query is unranked or the document has no usable
    /// vector field. An empty stored vector counts as missing.
    pub fn score(&self, document: &Value) -> Result<Option<f32>, DomainError> {
        let Some(rank) = &self.vector_rank else {
            return Ok(None);
        };

        let Some(candidate) = read_vector(document, &rank.field).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        similarity::check_dimensions(&rank.vector, &candidate)?;

        Ok(Some(similarity::score(&rank.vector, &candidate)))
    }

    /// Evaluate the query over documents given in natural order.
    ///
    /// Ranked results are sorted by score descending; the sort is stable so
    /// equal scores keep natural order.
    pub fn materialize<'a, I>(&self, documents: I) -> Result<Vec<QueryRow>, DomainError>
    where
        I: IntoIterator<Item = (&'a PartitionKey, &'a Value)>,
    {
        self.validate()?;

        if self.limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(Option<f32>, &Value)> = Vec::new();

        for (partition_key, document) in documents {
            if !self.matches(partition_key, document) {
                continue;
            }

            let score = self.score(document)?;

            if self.vector_rank.is_some() {
                let Some(score) = score else {
                    continue;
                };

                if let Some(floor) = self.min_score {
                    if !similarity::matches(score, floor) {
                        continue;
                    }
                }
            }

            candidates.push((score, document));
        }

        if self.vector_rank.is_some() {
            candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        }

        let mut rows: Vec<QueryRow> = Vec::new();

        for (score, document) in candidates {
            let row = self.project(document, score);

            if self.distinct && rows.iter().any(|r| r.document == row.document) {
                continue;
            }

            rows.push(row);

            if self.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }

        Ok(rows)
    }

    /// Apply the projection to a matching document
    pub fn project(&self, document: &Value, score: Option<f32>) -> QueryRow {
        let document = match &self.projection {
            Projection::All => document.clone(),
            Projection::Fields(fields) => {
                let mut projected = Map::new();

                for field in fields {
                    if let Some(value) = lookup(document, field) {
                        projected.insert(field.clone(), value.clone());
                    }
                }

                Value::Object(projected)
            }
            Projection::Value(field) => lookup(document, field).cloned().unwrap_or(Value::Null),
        };

        QueryRow { document, score }
    }
}

/// One query result
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    /// Projected document
    pub document: Value,
    /// Similarity score for ranked queries
    pub score: Option<f32>,
}

impl QueryRow {
    /// Deserialize the projected document
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, DomainError> {
        serde_json::from_value(self.document).map_err(|e| {
            DomainError::serialization(format!("Failed to deserialize query row: {}", e))
        })
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPage {
    pub rows: Vec<QueryRow>,
    /// Token for the next page; `None` once the result set is exhausted
    pub continuation: Option<String>,
}

impl QueryPage {
    /// Slice a materialized result set into an offset-continued page
    pub fn from_materialized(
        rows: Vec<QueryRow>,
        offset: usize,
        page_size: usize,
    ) -> Result<Self, DomainError> {
        let total = rows.len();
        let end = offset.saturating_add(page_size).min(total);
        let rows: Vec<QueryRow> = rows.into_iter().skip(offset).take(page_size).collect();

        let continuation = if end < total {
            Some(Continuation::Offset { offset: end }.encode()?)
        } else {
            None
        };

        Ok(Self { rows, continuation })
    }
}

/// Opaque continuation token contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Continuation {
    /// Resume after this identity in natural order
    After { partition_key: String, id: String },
    /// Resume at this position of a materialized result set
    Offset { offset: usize },
}

impl Continuation {
    pub fn encode(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(token: &str) -> Result<Self, DomainError> {
        serde_json::from_str(token).map_err(|e| {
            DomainError::invalid_argument(format!("Malformed continuation token: {}", e))
        })
    }

    /// Offset of a materialized query; a keyset token here is a caller bug
    pub fn offset(token: Option<&str>) -> Result<usize, DomainError> {
        match token.map(Self::decode).transpose()? {
            None => Ok(0),
            Some(Self::Offset { offset }) => Ok(offset),
            Some(Self::After { .. }) => Err(DomainError::invalid_argument(
                "Continuation token does not belong to this query",
            )),
        }
    }

    /// Keyset position of a streamable query
    pub fn after(token: Option<&str>) -> Result<Option<(String, String)>, DomainError> {
        match token.map(Self::decode).transpose()? {
            None => Ok(None),
            Some(Self::After { partition_key, id }) => Ok(Some((partition_key, id))),
            Some(Self::Offset { .. }) => Err(DomainError::invalid_argument(
                "Continuation token does not belong to this query",
            )),
        }
    }
}

/// Resolve a dotted field path such as `owner.name`
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn read_vector(document: &Value, field: &str) -> Option<Vec<f32>> {
    lookup(document, field)?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<(PartitionKey, Value)> {
        vec![
            (
                PartitionKey::new("a"),
                json!({"id": "1", "type": "Doc", "tag": "x", "vector": [1.0, 0.0]}),
            ),
            (
                PartitionKey::new("a"),
                json!({"id": "2", "type": "Doc", "tag": "y", "vector": [0.8, 0.6]}),
            ),
            (
                PartitionKey::new("b"),
                json!({"id": "3", "type": "Other", "tag": "x", "vector": [0.0, 1.0]}),
            ),
            (PartitionKey::new("b"), json!({"id": "4", "type": "Doc", "tag": "x"})),
        ]
    }

    fn run(query: &Query) -> Vec<QueryRow> {
        let docs = docs();
        query
            .materialize(docs.iter().map(|(pk, d)| (pk, d)))
            .unwrap()
    }

    fn ids(rows: &[QueryRow]) -> Vec<&str> {
        rows.iter()
            .map(|r| r.document["id"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_unranked_query_keeps_natural_order() {
        let rows = run(&Query::new());
        assert_eq!(ids(&rows), vec!["1", "2", "3", "4"]);
        assert!(rows.iter().all(|r| r.score.is_none()));
    }

    #[test]
    fn test_partition_scope_and_filters() {
        let rows = run(&Query::new().with_partition_key("b"));
        assert_eq!(ids(&rows), vec!["3", "4"]);

        let rows = run(&Query::new().with_filter("type", "Doc").with_filter("tag", "x"));
        assert_eq!(ids(&rows), vec!["1", "4"]);
    }

    #[test]
    fn test_vector_rank_orders_descending_and_applies_floor() {
        let query = Query::new()
            .with_vector_rank("vector", vec![1.0, 0.0])
            .with_min_score(0.5);
        let rows = run(&query);

        // "3" is orthogonal, "4" has no vector
        assert_eq!(ids(&rows), vec!["1", "2"]);
        assert!(rows[0].score.unwrap() >= rows[1].score.unwrap());
        assert!(rows.iter().all(|r| r.score.unwrap() > 0.5));
    }

    #[test]
    fn test_limit_truncates_after_ranking() {
        let query = Query::new()
            .with_vector_rank("vector", vec![0.0, 1.0])
            .with_limit(1);
        let rows = run(&query);

        assert_eq!(ids(&rows), vec!["3"]);
        assert!(run(&query.clone().with_limit(0)).is_empty());
    }

    #[test]
    fn test_projection_fields_and_value() {
        let rows = run(&Query::new().with_partition_key("a").with_fields(&["tag"]));
        assert_eq!(rows[0].document, json!({"tag": "x"}));

        let rows = run(&Query::new().with_partition_key("a").with_value("id"));
        assert_eq!(rows[0].document, json!("1"));
    }

    #[test]
    fn test_distinct_drops_duplicate_rows() {
        let rows = run(&Query::new().with_value("tag").with_distinct());
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_is_invalid_argument() {
        let docs = docs();
        let query = Query::new().with_vector_rank("vector", vec![1.0, 0.0, 0.0]);
        let err = query
            .materialize(docs.iter().map(|(pk, d)| (pk, d)))
            .unwrap_err();

        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_missing_or_empty_vector_is_skipped() {
        let mut docs = docs();
        docs.push((PartitionKey::new("a"), json!({"id": "5", "type": "Doc", "vector": []})));
        docs.push((PartitionKey::new("a"), json!({"id": "6", "type": "Doc"})));

        let query = Query::new().with_vector_rank("vector", vec![1.0, 0.0]);
        let rows = query
            .materialize(docs.iter().map(|(pk, d)| (pk, d)))
            .unwrap();

        assert_eq!(ids(&rows), vec!["1", "2", "3"]);
        assert!(rows.iter().all(|r| r.score.is_some()));
        assert_eq!(query.score(&json!({"vector": []})).unwrap(), None);
    }

    #[test]
    fn test_validate() {
        assert!(Query::new().with_min_score(0.5).validate().is_err());
        assert!(Query::new().with_vector_rank("v", vec![]).validate().is_err());
        assert!(Query::new().with_vector_rank("v", vec![1.0]).validate().is_ok());
    }

    #[test]
    fn test_streamable() {
        assert!(Query::new().with_filter("type", "Doc").is_streamable());
        assert!(!Query::new().with_limit(3).is_streamable());
        assert!(!Query::new().with_distinct().is_streamable());
        assert!(!Query::new().with_vector_rank("v", vec![1.0]).is_streamable());
    }

    #[test]
    fn test_page_from_materialized() {
        let rows = run(&Query::new());

        let first = QueryPage::from_materialized(rows.clone(), 0, 3).unwrap();
        assert_eq!(first.rows.len(), 3);

        let offset = Continuation::offset(first.continuation.as_deref()).unwrap();
        assert_eq!(offset, 3);

        let second = QueryPage::from_materialized(rows, offset, 3).unwrap();
        assert_eq!(second.rows.len(), 1);
        assert!(second.continuation.is_none());
    }

    #[test]
    fn test_continuation_kinds_are_not_interchangeable() {
        let keyset = Continuation::After {
            partition_key: "a".to_string(),
            id: "1".to_string(),
        }
        .encode()
        .unwrap();

        assert!(Continuation::offset(Some(&keyset)).is_err());
        assert_eq!(
            Continuation::after(Some(&keyset)).unwrap(),
            Some(("a".to_string(), "1".to_string()))
        );
        assert!(Continuation::after(Some("garbage")).is_err());
    }
}
