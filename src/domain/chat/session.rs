use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainError;

/// Default display name for a new chat session
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

/// A chat session; its id doubles as the partition key of its messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: String,
    session_id: String,
    name: String,
    #[serde(default)]
    tokens: u32,
}

impl Session {
    /// Create a session with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Create a session with a caller-chosen id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();

        Self {
            session_id: id.clone(),
            id,
            name: name.into(),
            tokens: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total tokens consumed by the session so far
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn add_tokens(&mut self, tokens: u32) {
        self.tokens = self.tokens.saturating_add(tokens);
    }

    /// A session must be its own partition
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.is_empty() {
            return Err(DomainError::invalid_argument("Session id must not be empty"));
        }

        if self.id != self.session_id {
            return Err(DomainError::invalid_argument(format!(
                "Session id '{}' must equal its sessionId '{}'",
                self.id, self.session_id
            )));
        }

        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_its_own_partition() {
        let session = Session::new("Trip planning");

        assert_eq!(session.id(), session.session_id());
        assert_eq!(session.name(), "Trip planning");
        assert_eq!(session.tokens(), 0);
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_rename_and_tokens() {
        let mut session = Session::default();
        assert_eq!(session.name(), DEFAULT_SESSION_NAME);

        session.rename("Bikes");
        session.add_tokens(10);
        session.add_tokens(u32::MAX);

        assert_eq!(session.name(), "Bikes");
        assert_eq!(session.tokens(), u32::MAX);
    }

    #[test]
    fn test_validate_rejects_mismatched_partition() {
        let session: Session = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "sessionId": "s2",
            "name": "x"
        }))
        .unwrap();

        assert!(session.validate().unwrap_err().is_invalid_argument());
    }
}
