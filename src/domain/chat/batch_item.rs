use serde::{Deserialize, Serialize};

use super::message::Message;
use super::session::Session;
use crate::domain::document_store::PartitionKey;
use crate::domain::DomainError;

/// `type` discriminator of session documents
pub const SESSION_TYPE: &str = "Session";

/// `type` discriminator of message documents
pub const MESSAGE_TYPE: &str = "Message";

/// A document of the chat container
///
/// Serialized with a `type` field so sessions and messages can share one
/// partition and one transactional batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchItem {
    Session(Session),
    Message(Message),
}

impl BatchItem {
    /// Partition the item is stored in
    pub fn partition_key(&self) -> PartitionKey {
        match self {
            Self::Session(session) => PartitionKey::new(session.session_id()),
            Self::Message(message) => PartitionKey::new(message.session_id()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Session(session) => session.id(),
            Self::Message(message) => message.id(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Session(session) => session.validate(),
            Self::Message(message) => message.validate(),
        }
    }

    /// The single partition shared by every item.
    ///
    /// Fails before anything is written if the items span more than one
    /// partition or the slice is empty.
    pub fn common_partition_key(items: &[BatchItem]) -> Result<PartitionKey, DomainError> {
        let Some(first) = items.first() else {
            return Err(DomainError::invalid_argument(
                "Batch must contain at least one item",
            ));
        };

        let partition_key = first.partition_key();

        if let Some(other) = items
            .iter()
            .map(BatchItem::partition_key)
            .find(|pk| *pk != partition_key)
        {
            return Err(DomainError::invalid_argument(format!(
                "All items must have the same partition key: found '{}' and '{}'",
                partition_key, other
            )));
        }

        Ok(partition_key)
    }
}

impl From<Session> for BatchItem {
    fn from(session: Session) -> Self {
        Self::Session(session)
    }
}

impl From<Message> for BatchItem {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_with_type_tag() {
        let session = Session::with_id("s1", "Chat");
        let value = serde_json::to_value(BatchItem::from(session)).unwrap();

        assert_eq!(value["type"], SESSION_TYPE);
        assert_eq!(value["sessionId"], "s1");

        let message = Message::user("s1", "hi");
        let value = serde_json::to_value(BatchItem::from(message)).unwrap();

        assert_eq!(value["type"], MESSAGE_TYPE);
    }

    #[test]
    fn test_round_trip_keeps_variant() {
        let item = BatchItem::from(Message::user("s1", "hi"));
        let value = serde_json::to_value(&item).unwrap();
        let back: BatchItem = serde_json::from_value(value).unwrap();

        assert_eq!(back, item);
    }

    #[test]
    fn test_partition_key_derivation() {
        let session = BatchItem::from(Session::with_id("s1", "Chat"));
        let message = BatchItem::from(Message::user("s1", "hi"));

        assert_eq!(session.partition_key(), message.partition_key());
        assert_eq!(
            BatchItem::common_partition_key(&[session, message]).unwrap(),
            PartitionKey::new("s1")
        );
    }

    #[test]
    fn test_common_partition_key_rejects_mixed_and_empty() {
        let items = vec![
            BatchItem::from(Message::user("s1", "a")),
            BatchItem::from(Message::user("s2", "b")),
        ];

        assert!(BatchItem::common_partition_key(&items)
            .unwrap_err()
            .is_invalid_argument());
        assert!(BatchItem::common_partition_key(&[])
            .unwrap_err()
            .is_invalid_argument());
    }
}
