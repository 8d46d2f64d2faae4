//! JSON protocol for board synchronization over WebSocket text frames.
//!
//! Every frame is an object tagged by `type`:
//! ```text
//! client → server   join | fetch | intent | chat | ping
//! server → client   welcome | snapshot | board_updated | chat_message
//!                   ack | rejected | pong
//! ```
//!
//! `board_updated` carries the full post-commit board, never a diff; its
//! `version` is the commit number so receivers can drop anything older
//! than what they already hold.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use trellis_core::{Board, BoardError, ChatDraft, ChatMessage, Intent};
use uuid::Uuid;

pub type SessionId = Uuid;

/// The two real-time topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    BoardUpdated,
    ChatMessage,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::BoardUpdated => "board updated",
            Topic::ChatMessage => "chat message",
        }
    }
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Register as an observer and subscribe to both topics.
    Join { user: String },
    /// Ask for the current snapshot.
    Fetch,
    Intent { request_id: u64, intent: Intent },
    Chat {
        #[serde(default)]
        id: Option<u64>,
        text: String,
        #[serde(default)]
        user: Option<String>,
    },
    Ping,
}

impl ClientMessage {
    pub fn chat(draft: ChatDraft) -> Self {
        ClientMessage::Chat {
            id: draft.id,
            text: draft.text,
            user: draft.user,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Error details returned to the originator of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&BoardError> for ErrorBody {
    fn from(e: &BoardError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Reply to `join`: the snapshot the session's event stream continues from.
    Welcome {
        session_id: SessionId,
        version: u64,
        #[serde(flatten)]
        board: Board,
    },
    /// Reply to `fetch`.
    Snapshot {
        version: u64,
        #[serde(flatten)]
        board: Board,
    },
    BoardUpdated {
        version: u64,
        #[serde(flatten)]
        board: Board,
    },
    ChatMessage {
        #[serde(flatten)]
        message: ChatMessage,
    },
    /// The intent was accepted. `committed` is false when it changed nothing.
    Ack {
        request_id: u64,
        version: u64,
        committed: bool,
    },
    Rejected {
        #[serde(default)]
        request_id: Option<u64>,
        error: ErrorBody,
    },
    Pong,
}

impl ServerMessage {
    pub fn rejected(request_id: Option<u64>, error: &BoardError) -> Self {
        ServerMessage::Rejected {
            request_id,
            error: error.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    ConnectionClosed,
}
