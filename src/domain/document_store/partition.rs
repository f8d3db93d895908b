//! Partition keys, partition key paths and container definitions

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DomainError;

/// Container names double as SQL table names
static CONTAINER_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("valid container name regex"));

/// Value of a document's partition key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// JSON path to the partition key inside a document, e.g. `/sessionId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKeyPath {
    raw: String,
    segments: Vec<String>,
}

impl PartitionKeyPath {
    /// Parse a path of the form `/field` or `/outer/inner`
    pub fn parse(path: &str) -> Result<Self, DomainError> {
        let trimmed = path.strip_prefix('/').ok_or_else(|| {
            DomainError::invalid_argument(format!(
                "Partition key path '{}' must start with '/'",
                path
            ))
        })?;

        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();

        if segments.iter().any(|s| s.is_empty()) {
            return Err(DomainError::invalid_argument(format!(
                "Partition key path '{}' contains an empty segment",
                path
            )));
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Read the partition key value out of a document
    pub fn extract(&self, document: &Value) -> Result<PartitionKey, DomainError> {
        let mut current = document;

        for segment in &self.segments {
            current = current.get(segment).ok_or_else(|| {
                DomainError::invalid_argument(format!(
                    "Document is missing partition key '{}'",
                    self.raw
                ))
            })?;
        }

        current
            .as_str()
            .map(PartitionKey::new)
            .ok_or_else(|| {
                DomainError::invalid_argument(format!(
                    "Partition key '{}' must be a string",
                    self.raw
                ))
            })
    }
}

/// Definition of a partitioned container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    name: String,
    partition_key_path: PartitionKeyPath,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, partition_key_path: &str) -> Result<Self, DomainError> {
        let name = name.into();

        if !CONTAINER_NAME_PATTERN.is_match(&name) {
            return Err(DomainError::invalid_argument(format!(
                "Invalid container name '{}': must be lowercase alphanumeric or '_', starting with a letter",
                name
            )));
        }

        Ok(Self {
            name,
            partition_key_path: PartitionKeyPath::parse(partition_key_path)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_key_path(&self) -> &PartitionKeyPath {
        &self.partition_key_path
    }

    /// Extract the `(partition key, id)` identity of a document
    pub fn identify(&self, document: &Value) -> Result<(PartitionKey, String), DomainError> {
        let id = document_id(document)?;
        let partition_key = self.partition_key_path.extract(document)?;
        Ok((partition_key, id))
    }
}

/// Read the mandatory string `id` of a document
pub fn document_id(document: &Value) -> Result<String, DomainError> {
    document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DomainError::invalid_argument("Document must have a non-empty string 'id'"))
}
