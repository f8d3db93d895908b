//! PostgreSQL document store implementation with connection pooling

use std::fmt::Debug;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, warn};

use crate::domain::document_store::{
    BatchLimits, BatchOperation, BatchResponse, ContainerSpec, Continuation, DocumentStore,
    FieldFilter, PartitionKey, Query, QueryPage, QueryRow, TransactionalBatch,
};
use crate::domain::DomainError;
use crate::infrastructure::metrics;

use super::in_memory::DEFAULT_PAGE_SIZE;

/// PostgreSQL connection configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/chat_store".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Opens a connection pool
    pub async fn connect(&self) -> Result<PgPool, DomainError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(std::time::Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))
    }
}

/// PostgreSQL-backed container
///
/// Stores documents as JSONB in a table named after the container with
/// `(partition_key, id)` as primary key. Equality filters and the partition
/// scope are pushed down to SQL; vector ranking runs in-process on the
/// fetched candidates. Batches run inside one SQL transaction.
///
/// Ranked and DISTINCT queries fetch every row passing the filters and
/// evaluate them again for each page requested. A semantic cache lookup is
/// therefore a scan of the whole cache container, and draining a ranked
/// query costs one such scan per page. Only unranked TOP-N queries push
/// their limit down to SQL.
pub struct PostgresDocumentStore {
    pool: PgPool,
    container: ContainerSpec,
    page_size: usize,
    limits: BatchLimits,
}

impl Debug for PostgresDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDocumentStore")
            .field("container", &self.container.name())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl PostgresDocumentStore {
    /// Creates a store over an existing pool
    pub fn new(pool: PgPool, container: ContainerSpec) -> Self {
        Self {
            pool,
            container,
            page_size: DEFAULT_PAGE_SIZE,
            limits: BatchLimits::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self) -> &str {
        self.container.name()
    }

    /// Ensures the container table exists
    pub async fn ensure_table(&self) -> Result<(), DomainError> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                partition_key TEXT NOT NULL,
                id TEXT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (partition_key, id)
            )
            "#,
            self.table()
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("create table", e))?;

        Ok(())
    }

    fn keyed(&self, document: &Value) -> Result<(PartitionKey, String), DomainError> {
        self.limits.check_item_size(document)?;
        self.container.identify(document)
    }

    /// Builds the WHERE clause shared by both paging modes.
    ///
    /// Bind order: `$1` containment filter, `$2` partition key (nullable).
    fn where_clause(&self) -> &'static str {
        "data @> $1 AND ($2::TEXT IS NULL OR partition_key = $2)"
    }

    async fn stream_page(
        &self,
        query: &Query,
        continuation: Option<&str>,
    ) -> Result<QueryPage, DomainError> {
        let after = Continuation::after(continuation)?;
        let keyset = if after.is_some() {
            " AND (partition_key, id) > ($4, $5)"
        } else {
            ""
        };

        let sql = format!(
            "SELECT partition_key, id, data FROM {} WHERE {}{} ORDER BY partition_key, id LIMIT $3",
            self.table(),
            self.where_clause(),
            keyset
        );

        let mut statement = sqlx::query(&sql)
            .bind(containment(query.filters()))
            .bind(query.partition_key().map(|pk| pk.as_str().to_string()))
            .bind(self.page_size as i64);

        if let Some((partition_key, id)) = &after {
            statement = statement.bind(partition_key.clone()).bind(id.clone());
        }

        let fetched = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("query", e))?;

        let full_page = fetched.len() >= self.page_size;
        let mut rows: Vec<QueryRow> = Vec::with_capacity(fetched.len());
        let mut last_key: Option<(String, String)> = None;

        for row in &fetched {
            let (partition_key, id, document) = decode_row(row)?;

            if query.matches(&partition_key, &document) {
                rows.push(query.project(&document, None));
            }

            last_key = Some((partition_key.as_str().to_string(), id));
        }

        let continuation = match last_key {
            Some((partition_key, id)) if full_page => {
                Some(Continuation::After { partition_key, id }.encode()?)
            }
            _ => None,
        };

        Ok(QueryPage { rows, continuation })
    }

    async fn materialized_page(
        &self,
        query: &Query,
        continuation: Option<&str>,
    ) -> Result<QueryPage, DomainError> {
        let offset = Continuation::offset(continuation)?;
        let limit = pushed_down_limit(query)
            .map(|limit| format!(" LIMIT {}", limit))
            .unwrap_or_default();
        let sql = format!(
            "SELECT partition_key, id, data FROM {} WHERE {} ORDER BY partition_key, id{}",
            self.table(),
            self.where_clause(),
            limit
        );

        let mut stream = sqlx::query(&sql)
            .bind(containment(query.filters()))
            .bind(query.partition_key().map(|pk| pk.as_str().to_string()))
            .fetch(&self.pool);

        let mut candidates: Vec<(PartitionKey, Value)> = Vec::new();

        while let Some(row) = stream.try_next().await.map_err(|e| db_error("query", e))? {
            let (partition_key, _, document) = decode_row(&row)?;
            candidates.push((partition_key, document));
        }

        let rows = query.materialize(candidates.iter().map(|(pk, doc)| (pk, doc)))?;

        QueryPage::from_materialized(rows, offset, self.page_size)
    }

    async fn apply_operation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        partition_key: &PartitionKey,
        index: usize,
        operation: &BatchOperation,
    ) -> Result<(), DomainError> {
        let id = operation.id()?;

        let affected = match operation {
            BatchOperation::Create(document) => {
                let sql = format!(
                    "INSERT INTO {} (partition_key, id, data) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                    self.table()
                );
                sqlx::query(&sql)
                    .bind(partition_key.as_str())
                    .bind(&id)
                    .bind(document)
                    .execute(&mut **tx)
                    .await
            }
            BatchOperation::Replace(document) => {
                let sql = format!(
                    "UPDATE {} SET data = $3, updated_at = NOW() WHERE partition_key = $1 AND id = $2",
                    self.table()
                );
                sqlx::query(&sql)
                    .bind(partition_key.as_str())
                    .bind(&id)
                    .bind(document)
                    .execute(&mut **tx)
                    .await
            }
            BatchOperation::Upsert(document) => {
                let sql = upsert_sql(self.table());
                sqlx::query(&sql)
                    .bind(partition_key.as_str())
                    .bind(&id)
                    .bind(document)
                    .execute(&mut **tx)
                    .await
            }
            BatchOperation::Delete { .. } => {
                let sql = format!(
                    "DELETE FROM {} WHERE partition_key = $1 AND id = $2",
                    self.table()
                );
                sqlx::query(&sql)
                    .bind(partition_key.as_str())
                    .bind(&id)
                    .execute(&mut **tx)
                    .await
            }
        }
        .map_err(|e| db_error("batch operation", e))?
        .rows_affected();

        if affected == 0 {
            return Err(match operation {
                BatchOperation::Create(_) => DomainError::conflict(format!(
                    "Batch operation {} (create): item '{}' already exists",
                    index, id
                )),
                _ => DomainError::not_found(format!(
                    "Batch operation {} ({}): item '{}' not found",
                    index,
                    operation.kind(),
                    id
                )),
            });
        }

        Ok(())
    }

    async fn apply_batch(&self, batch: &TransactionalBatch) -> Result<BatchResponse, DomainError> {
        batch.validate(&self.container, &self.limits)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        for (index, operation) in batch.operations().iter().enumerate() {
            if let Err(e) = self
                .apply_operation(&mut tx, batch.partition_key(), index, operation)
                .await
            {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Failed to roll back batch transaction");
                }
                return Err(e);
            }
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit transaction", e))?;

        Ok(BatchResponse {
            partition_key: batch.partition_key().clone(),
            operation_count: batch.len(),
        })
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn read_item(
        &self,
        partition_key: &PartitionKey,
        id: &str,
    ) -> Result<Option<Value>, DomainError> {
        let sql = format!(
            "SELECT data FROM {} WHERE partition_key = $1 AND id = $2",
            self.table()
        );

        let row = sqlx::query(&sql)
            .bind(partition_key.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("read item", e))?;

        row.map(|r| r.try_get::<Value, _>("data"))
            .transpose()
            .map_err(|e| db_error("decode item", e))
    }

    async fn create_item(&self, document: Value) -> Result<Value, DomainError> {
        let (partition_key, id) = self.keyed(&document)?;
        let sql = format!(
            "INSERT INTO {} (partition_key, id, data) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            self.table()
        );

        let result = sqlx::query(&sql)
            .bind(partition_key.as_str())
            .bind(&id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("create item", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::conflict(format!(
                "Item '{}' already exists in partition '{}' of '{}'",
                id,
                partition_key,
                self.table()
            )));
        }

        Ok(document)
    }

    async fn replace_item(&self, id: &str, document: Value) -> Result<Value, DomainError> {
        let (partition_key, document_id) = self.keyed(&document)?;

        if document_id != id {
            return Err(DomainError::invalid_argument(format!(
                "Replacement document id '{}' does not match '{}'",
                document_id, id
            )));
        }

        let sql = format!(
            "UPDATE {} SET data = $3, updated_at = NOW() WHERE partition_key = $1 AND id = $2",
            self.table()
        );

        let result = sqlx::query(&sql)
            .bind(partition_key.as_str())
            .bind(id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("replace item", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!(
                "Item '{}' not found in partition '{}' of '{}'",
                id,
                partition_key,
                self.table()
            )));
        }

        Ok(document)
    }

    async fn upsert_item(&self, document: Value) -> Result<Value, DomainError> {
        let (partition_key, id) = self.keyed(&document)?;

        sqlx::query(&upsert_sql(self.table()))
            .bind(partition_key.as_str())
            .bind(&id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("upsert item", e))?;

        Ok(document)
    }

    async fn delete_item(
        &self,
        partition_key: &PartitionKey,
        id: &str,
    ) -> Result<bool, DomainError> {
        let sql = format!(
            "DELETE FROM {} WHERE partition_key = $1 AND id = $2",
            self.table()
        );

        let result = sqlx::query(&sql)
            .bind(partition_key.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete item", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_page(
        &self,
        query: &Query,
        continuation: Option<String>,
    ) -> Result<QueryPage, DomainError> {
        query.validate()?;

        let page = if query.is_streamable() {
            self.stream_page(query, continuation.as_deref()).await?
        } else {
            self.materialized_page(query, continuation.as_deref()).await?
        };

        debug!(
            container = self.table(),
            rows = page.rows.len(),
            has_more = page.continuation.is_some(),
            "Query page served"
        );

        Ok(page)
    }

    async fn execute_batch(&self, batch: TransactionalBatch) -> Result<BatchResponse, DomainError> {
        let result = self.apply_batch(&batch).await;

        metrics::record_batch(self.table(), result.is_ok(), batch.len());
        result
    }
}

fn upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {} (partition_key, id, data) VALUES ($1, $2, $3)
        ON CONFLICT (partition_key, id)
        DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
        "#,
        table
    )
}

/// Row limit SQL can apply without changing the result.
///
/// Ranking and DISTINCT need every candidate. Array or object filter values
/// are looser under `@>` than the in-process equality check, so a limit
/// could cut off rows that would have matched.
fn pushed_down_limit(query: &Query) -> Option<usize> {
    let exact_filters = query
        .filters()
        .iter()
        .all(|f| !f.value.is_array() && !f.value.is_object());

    if query.vector_rank().is_some() || query.is_distinct() || !exact_filters {
        return None;
    }

    query.limit()
}

/// JSONB containment object equivalent to a conjunction of equality filters
fn containment(filters: &[FieldFilter]) -> Value {
    let mut root = Map::new();

    for filter in filters {
        let mut segments = filter.field.split('.').rev();
        let Some(leaf) = segments.next() else {
            continue;
        };

        let (key, value) = segments.fold(
            (leaf.to_string(), filter.value.clone()),
            |(key, value), parent| {
                let mut object = Map::new();
                object.insert(key, value);
                (parent.to_string(), Value::Object(object))
            },
        );

        merge_into(&mut root, key, value);
    }

    Value::Object(root)
}

fn merge_into(target: &mut Map<String, Value>, key: String, value: Value) {
    match (target.remove(&key), value) {
        (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                merge_into(&mut existing, k, v);
            }
            target.insert(key, Value::Object(existing));
        }
        (_, value) => {
            target.insert(key, value);
        }
    }
}

fn decode_row(row: &PgRow) -> Result<(PartitionKey, String, Value), DomainError> {
    let partition_key: String = row
        .try_get("partition_key")
        .map_err(|e| db_error("decode row", e))?;
    let id: String = row.try_get("id").map_err(|e| db_error("decode row", e))?;
    let data: Value = row.try_get("data").map_err(|e| db_error("decode row", e))?;

    Ok((PartitionKey::new(partition_key), id, data))
}

fn db_error(action: &str, e: sqlx::Error) -> DomainError {
    DomainError::storage(format!("Failed to {}: {}", action, e))
}
