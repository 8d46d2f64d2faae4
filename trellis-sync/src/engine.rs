//! Wiring of the sync components for one board.
//!
//! An [`Engine`] is cheap to clone and is shared by the WebSocket server and
//! the HTTP boundary, so both entry points commit through the same resolver.

use std::sync::Arc;
use thiserror::Error;
use trellis_core::{BoardError, ChatDraft, ChatMessage, Intent};

use crate::broadcast::BroadcastChannel;
use crate::config::ServerConfig;
use crate::protocol::SessionId;
use crate::resolver::{Commit, MutationResolver};
use crate::session::SessionRegistry;
use crate::storage::{SnapshotStore, StoreConfig, StoreError};
use crate::store::{BoardSnapshot, StateStore};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Clone)]
pub struct Engine {
    pub store: Arc<StateStore>,
    pub resolver: Arc<MutationResolver>,
    pub channel: Arc<BroadcastChannel>,
    pub sessions: Arc<SessionRegistry>,
    snapshots: Option<Arc<SnapshotStore>>,
    board_key: String,
}

impl Engine {
    /// Engine without persistence, starting from an empty board.
    pub fn in_memory(config: &ServerConfig) -> Self {
        Self::assemble(config, None)
    }

    /// Engine for `config`: opens storage when `storage_path` is set and
    /// restores the last persisted snapshot.
    pub async fn open(config: &ServerConfig) -> Result<Self, EngineError> {
        let snapshots = match &config.storage_path {
            Some(path) => Some(Arc::new(SnapshotStore::open(StoreConfig::at(path))?)),
            None => None,
        };
        let engine = Self::assemble(config, snapshots);
        engine.recover().await?;
        Ok(engine)
    }

    /// Engine over an already opened snapshot store.
    pub async fn with_snapshots(config: &ServerConfig, snapshots: Arc<SnapshotStore>) -> Result<Self, EngineError> {
        let engine = Self::assemble(config, Some(snapshots));
        engine.recover().await?;
        Ok(engine)
    }

    fn assemble(config: &ServerConfig, snapshots: Option<Arc<SnapshotStore>>) -> Self {
        let store = Arc::new(StateStore::new(config.chat_history_limit));
        let channel = Arc::new(BroadcastChannel::start(config.broadcast_capacity));
        let mut resolver = MutationResolver::new(store.clone(), channel.clone());
        if let Some(s) = &snapshots {
            resolver = resolver.with_persistence(s.clone(), config.board_key.clone());
        }
        Self {
            store,
            resolver: Arc::new(resolver),
            channel,
            sessions: Arc::new(SessionRegistry::new(config.max_sessions)),
            snapshots,
            board_key: config.board_key.clone(),
        }
    }

    /// Load the persisted board, if any. Returns the recovered version.
    ///
    /// A snapshot that no longer parses is an error rather than an empty
    /// board, so the next commit cannot overwrite it.
    pub async fn recover(&self) -> Result<Option<u64>, EngineError> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(None);
        };
        let bytes = match snapshots.load_snapshot(&self.board_key) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                log::info!("No persisted snapshot for board '{}', starting empty", self.board_key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let meta = snapshots.load_metadata(&self.board_key)?;
        let board = StateStore::load(&bytes).map_err(StoreError::InvalidBoard)?;

        log::info!(
            "Recovered board '{}' at v{} ({} lists, {} cards)",
            self.board_key,
            meta.version,
            board.lists.len(),
            board.card_count()
        );
        self.store.restore(board, meta.version).await;
        Ok(Some(meta.version))
    }

    pub async fn snapshot(&self) -> Arc<BoardSnapshot> {
        self.store.get().await
    }

    pub async fn submit(&self, origin: Option<SessionId>, intent: Intent) -> Result<Commit, BoardError> {
        self.resolver.submit(origin, intent).await
    }

    pub async fn post_chat(&self, origin: Option<SessionId>, draft: ChatDraft) -> Result<ChatMessage, BoardError> {
        self.resolver.post_chat(origin, draft).await
    }

    pub fn snapshots(&self) -> Option<&Arc<SnapshotStore>> {
        self.snapshots.as_ref()
    }

    pub fn board_key(&self) -> &str {
        &self.board_key
    }

    /// Stop the broadcast channel and flush storage.
    pub fn shutdown(&self) {
        self.channel.stop();
        if let Some(snapshots) = &self.snapshots {
            if let Err(e) = snapshots.sync() {
                log::error!("Failed to flush snapshot store: {e}");
            }
        }
    }
}
