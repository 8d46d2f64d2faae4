use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};

pub const DEFAULT_AUTHOR: &str = "User";

/// One entry of the append-only chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub text: String,
    pub user: String,
    /// Position in the stream, assigned when the message is appended.
    #[serde(skip)]
    pub seq: u64,
}

/// A chat message as submitted, before the store has accepted it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDraft {
    #[serde(default)]
    pub id: Option<u64>,
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
}

impl ChatDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            user: None,
        }
    }

    pub fn by(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Turn the draft into a message at position `seq`, using `fallback_id`
    /// when the sender did not pick one.
    pub fn accept(self, seq: u64, fallback_id: u64) -> Result<ChatMessage> {
        if self.text.trim().is_empty() {
            return Err(BoardError::MalformedInput("chat text must not be empty".into()));
        }
        let user = self
            .user
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
        Ok(ChatMessage {
            id: self.id.unwrap_or(fallback_id),
            text: self.text,
            user,
            seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_fills_defaults() {
        let msg = ChatDraft::new("hello").accept(3, 42).unwrap();
        assert_eq!(msg.id, 42);
        assert_eq!(msg.user, DEFAULT_AUTHOR);
        assert_eq!(msg.seq, 3);

        let msg = ChatDraft::new("hi").by("Ada").with_id(7).accept(0, 42).unwrap();
        assert_eq!(msg.id, 7);
        assert_eq!(msg.user, "Ada");
    }

    #[test]
    fn test_blank_text_rejected() {
        let err = ChatDraft::new("   ").accept(0, 1).unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
    }

    #[test]
    fn test_wire_payload_is_id_text_user() {
        let msg = ChatDraft::new("hey").by("Bo").with_id(9).accept(5, 0).unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({ "id": 9, "text": "hey", "user": "Bo" }));
    }
}
