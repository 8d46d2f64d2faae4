//! Registry of connected observers.

use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub user: String,
    /// Seconds since epoch
    pub connected_at: u64,
}

impl SessionInfo {
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        let user = if user.trim().is_empty() {
            trellis_core::chat::DEFAULT_AUTHOR.to_string()
        } else {
            user
        };
        Self {
            session_id: Uuid::new_v4(),
            user,
            connected_at: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session limit reached ({limit} observers)")]
    SessionLimit { limit: usize },
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Admit a new observer, or refuse if the registry is full.
    pub async fn register(&self, user: impl Into<String>) -> Result<SessionInfo, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::SessionLimit {
                limit: self.max_sessions,
            });
        }
        let info = SessionInfo::new(user);
        sessions.insert(info.session_id, info.clone());
        Ok(info)
    }

    pub async fn unregister(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
