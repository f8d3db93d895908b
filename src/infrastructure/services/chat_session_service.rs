//! Chat sessions and messages in one partitioned container
//!
//! A session and all of its messages share the session's partition, so a
//! session can be rewritten or removed together with its messages in one
//! transactional batch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::chat::{BatchItem, Message, Session, MESSAGE_TYPE, SESSION_TYPE};
use crate::domain::document_store::{
    from_document, to_document, BatchResponse, DocumentStore, PartitionKey, Query, QueryPager,
    TransactionalBatch,
};
use crate::domain::DomainError;

/// Session and message persistence
#[derive(Debug, Clone)]
pub struct ChatSessionService {
    store: Arc<dyn DocumentStore>,
}

impl ChatSessionService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a new session, `Conflict` if the id is taken
    pub async fn insert_session(&self, session: Session) -> Result<Session, DomainError> {
        session.validate()?;

        let document = to_document(&BatchItem::from(session))?;
        let created = self.store.create_item(document).await?;

        debug!(session_id = ?created.get("id"), "Session created");
        into_session(created)
    }

    /// Fully replace an existing session, `NotFound` if absent
    pub async fn update_session(&self, session: Session) -> Result<Session, DomainError> {
        session.validate()?;

        let id = session.id().to_string();
        let document = to_document(&BatchItem::from(session))?;
        let replaced = self.store.replace_item(&id, document).await?;

        into_session(replaced)
    }

    /// Point read of a session, `NotFound` if absent
    pub async fn get_session(&self, id: &str) -> Result<Session, DomainError> {
        let document = self
            .store
            .read_item(&PartitionKey::new(id), id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Session '{}' not found", id)))?;

        match from_document::<BatchItem>(document)? {
            BatchItem::Session(session) => Ok(session),
            BatchItem::Message(_) => Err(DomainError::not_found(format!(
                "Session '{}' not found",
                id
            ))),
        }
    }

    /// Every distinct session across all partitions
    pub async fn list_sessions(&self) -> Result<Vec<Session>, DomainError> {
        let query = Query::new()
            .with_filter("type", SESSION_TYPE)
            .with_distinct();

        QueryPager::new(self.store.as_ref(), query)
            .collect_typed::<BatchItem>()
            .await?
            .into_iter()
            .map(|item| match item {
                BatchItem::Session(session) => Ok(session),
                BatchItem::Message(message) => Err(DomainError::internal(format!(
                    "Session listing returned message '{}'",
                    message.id()
                ))),
            })
            .collect()
    }

    /// Store a message stamped with the current server time.
    ///
    /// Any timestamp already on the message is overwritten.
    pub async fn insert_message(&self, mut message: Message) -> Result<Message, DomainError> {
        message.validate()?;
        message.stamp(Utc::now());

        let document = to_document(&BatchItem::from(message))?;
        let created = self.store.create_item(document).await?;

        match from_document::<BatchItem>(created)? {
            BatchItem::Message(message) => Ok(message),
            BatchItem::Session(session) => Err(DomainError::internal(format!(
                "Message insert returned session '{}'",
                session.id()
            ))),
        }
    }

    /// Messages of one session in the store's natural order.
    ///
    /// Sort by [`Message::timestamp`] for chronological order.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, DomainError> {
        let query = Query::new()
            .with_partition_key(session_id)
            .with_filter("type", MESSAGE_TYPE);

        QueryPager::new(self.store.as_ref(), query)
            .collect_typed::<BatchItem>()
            .await?
            .into_iter()
            .filter_map(|item| match item {
                BatchItem::Message(message) => Some(Ok(message)),
                BatchItem::Session(_) => None,
            })
            .collect()
    }

    /// Upsert sessions and messages of one partition atomically.
    ///
    /// Items spanning more than one session are rejected before anything is
    /// written.
    pub async fn upsert_batch(&self, items: &[BatchItem]) -> Result<BatchResponse, DomainError> {
        let partition_key = BatchItem::common_partition_key(items)?;

        let mut batch = TransactionalBatch::new(partition_key.clone());

        for item in items {
            item.validate()?;
            batch = batch.upsert_item(to_document(item)?);
        }

        let response = self.store.execute_batch(batch).await?;

        debug!(
            partition_key = %partition_key,
            operations = response.operation_count,
            "Chat batch committed"
        );
        Ok(response)
    }

    /// Delete a session and every message in its partition in one batch.
    ///
    /// Returns the number of deleted items; zero when the partition is empty.
    pub async fn delete_session_and_messages(&self, session_id: &str) -> Result<usize, DomainError> {
        let query = Query::new()
            .with_partition_key(session_id)
            .with_value("id");

        let ids: Vec<String> = QueryPager::new(self.store.as_ref(), query)
            .collect_all()
            .await?
            .into_iter()
            .filter_map(|row| row.document.as_str().map(str::to_string))
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let batch = ids
            .into_iter()
            .fold(TransactionalBatch::new(session_id), TransactionalBatch::delete_item);

        let response = self.store.execute_batch(batch).await?;

        info!(
            session_id,
            deleted = response.operation_count,
            "Session and messages deleted"
        );
        Ok(response.operation_count)
    }
}

fn into_session(document: serde_json::Value) -> Result<Session, DomainError> {
    match from_document::<BatchItem>(document)? {
        BatchItem::Session(session) => Ok(session),
        BatchItem::Message(message) => Err(DomainError::internal(format!(
            "Expected a session document, found message '{}'",
            message.id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chat::MessageRole;
    use crate::domain::document_store::{
        BatchLimits, BatchOperation, ContainerSpec, MockDocumentStore, QueryPage, QueryRow,
    };
    use crate::infrastructure::document_store::InMemoryDocumentStore;
    use chrono::{Duration, TimeZone};
    use mockall::predicate::{always, eq};
    use serde_json::json;

    fn store() -> Arc<InMemoryDocumentStore> {
        let container = ContainerSpec::new("chat", "/sessionId").unwrap();
        Arc::new(InMemoryDocumentStore::new(container).with_page_size(2))
    }

    fn service() -> (ChatSessionService, Arc<InMemoryDocumentStore>) {
        let store = store();
        (ChatSessionService::new(store.clone()), store)
    }

    async fn pause() {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (chat, _) = service();

        let session = chat
            .insert_session(Session::with_id("s1", "First"))
            .await
            .unwrap();
        assert_eq!(session.name(), "First");

        let mut renamed = session.clone();
        renamed.rename("Renamed");
        renamed.add_tokens(12);
        chat.update_session(renamed).await.unwrap();

        let loaded = chat.get_session("s1").await.unwrap();
        assert_eq!(loaded.name(), "Renamed");
        assert_eq!(loaded.tokens(), 12);
    }

    #[tokio::test]
    async fn test_get_missing_session_is_not_found() {
        let (chat, _) = service();

        assert!(chat.get_session("nope").await.unwrap_err().is_not_found());
        assert!(chat
            .update_session(Session::with_id("nope", "x"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_insert_session_twice_conflicts() {
        let (chat, _) = service();
        chat.insert_session(Session::with_id("s1", "a")).await.unwrap();

        let err = chat
            .insert_session(Session::with_id("s1", "b"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_list_sessions_spans_partitions() {
        let (chat, _) = service();

        for id in ["s1", "s2", "s3"] {
            chat.insert_session(Session::with_id(id, id)).await.unwrap();
        }
        chat.insert_message(Message::user("s1", "hi")).await.unwrap();

        let mut ids: Vec<String> = chat
            .list_sessions()
            .await
            .unwrap()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn test_messages_listed_and_sorted_by_timestamp() {
        let (chat, _) = service();
        chat.insert_session(Session::with_id("S1", "Chat")).await.unwrap();

        chat.insert_message(Message::user("S1", "hi").with_id("M1"))
            .await
            .unwrap();
        pause().await;
        chat.insert_message(Message::assistant("S1", "hello").with_id("M2"))
            .await
            .unwrap();

        let mut messages = chat.list_messages("S1").await.unwrap();
        messages.sort_by_key(|m| m.timestamp());

        let contents: Vec<&str> = messages.iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["hi", "hello"]);
        assert_eq!(messages[1].role(), MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_insert_message_overrides_timestamp() {
        let (chat, _) = service();
        let stale = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let before = Utc::now();

        let stored = chat
            .insert_message(Message::user("s1", "hi").with_timestamp(stale))
            .await
            .unwrap();

        assert!(stored.timestamp() >= before);
        assert!(stored.timestamp() - before < Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_list_messages_is_scoped_to_session() {
        let (chat, _) = service();

        chat.insert_message(Message::user("s1", "a")).await.unwrap();
        chat.insert_message(Message::user("s2", "b")).await.unwrap();

        let messages = chat.list_messages("s1").await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content(), "a");
    }

    #[tokio::test]
    async fn test_upsert_batch_writes_session_and_messages() {
        let (chat, store) = service();

        let items = vec![
            BatchItem::from(Session::with_id("s1", "Chat")),
            BatchItem::from(Message::user("s1", "hi")),
            BatchItem::from(Message::assistant("s1", "hello")),
        ];

        let response = chat.upsert_batch(&items).await.unwrap();

        assert_eq!(response.operation_count, 3);
        assert_eq!(store.len().await, 3);
        assert_eq!(chat.list_messages("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_batch_mixed_partitions_writes_nothing() {
        let (chat, store) = service();

        let items = vec![
            BatchItem::from(Message::user("s1", "a")),
            BatchItem::from(Message::user("s2", "b")),
        ];

        let err = chat.upsert_batch(&items).await.unwrap_err();

        assert!(err.is_invalid_argument());
        assert!(store.is_empty().await);
        assert!(chat.list_messages("s1").await.unwrap().is_empty());
        assert!(chat.list_messages("s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_batch_over_limit_writes_nothing() {
        let container = ContainerSpec::new("chat", "/sessionId").unwrap();
        let store = Arc::new(InMemoryDocumentStore::new(container).with_limits(BatchLimits {
            max_operations: 2,
            ..Default::default()
        }));
        let chat = ChatSessionService::new(store.clone());

        let items: Vec<BatchItem> = (0..3)
            .map(|i| BatchItem::from(Message::user("s1", format!("m{}", i))))
            .collect();

        assert!(chat.upsert_batch(&items).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_session_and_messages() {
        let (chat, store) = service();

        chat.insert_session(Session::with_id("s1", "Chat")).await.unwrap();
        for i in 0..5 {
            chat.insert_message(Message::user("s1", format!("m{}", i)))
                .await
                .unwrap();
        }
        chat.insert_session(Session::with_id("s2", "Other")).await.unwrap();

        assert_eq!(chat.delete_session_and_messages("s1").await.unwrap(), 6);

        assert!(chat.list_messages("s1").await.unwrap().is_empty());
        assert!(chat.get_session("s1").await.unwrap_err().is_not_found());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_empty_session_is_noop() {
        let (chat, _) = service();

        assert_eq!(chat.delete_session_and_messages("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_collects_every_page_before_one_batch() {
        let mut store = MockDocumentStore::new();

        store
            .expect_query_page()
            .with(always(), eq(None))
            .times(1)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![
                        QueryRow { document: json!("s1"), score: None },
                        QueryRow { document: json!("m1"), score: None },
                    ],
                    continuation: Some("next".to_string()),
                })
            });
        store
            .expect_query_page()
            .with(always(), eq(Some("next".to_string())))
            .times(1)
            .returning(|_, _| {
                Ok(QueryPage {
                    rows: vec![QueryRow { document: json!("m2"), score: None }],
                    continuation: None,
                })
            });
        store
            .expect_execute_batch()
            .withf(|batch| {
                batch.partition_key().as_str() == "s1"
                    && batch.operations()
                        == [
                            BatchOperation::Delete { id: "s1".to_string() },
                            BatchOperation::Delete { id: "m1".to_string() },
                            BatchOperation::Delete { id: "m2".to_string() },
                        ]
            })
            .times(1)
            .returning(|batch| {
                Ok(BatchResponse {
                    partition_key: batch.partition_key().clone(),
                    operation_count: batch.len(),
                })
            });

        let chat = ChatSessionService::new(Arc::new(store));

        assert_eq!(chat.delete_session_and_messages("s1").await.unwrap(), 3);
    }
}
