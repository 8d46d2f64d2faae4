//! The Mutation Resolver: the single authority that turns intents into commits.
//!
//! Policy is last-committed-wins with no merge. Intents are applied strictly
//! in the order they acquire the write lock; an originator whose view was
//! stale is corrected by the snapshot broadcast after the commit.
//!
//! ```text
//! submit(intent)
//!   └─ write lock
//!        ├─ get current snapshot
//!        ├─ intent.apply ── Err ──► returned to caller only
//!        ├─ unchanged?  ─── yes ──► Commit::Unchanged
//!        ├─ store.replace (version + 1)
//!        ├─ persist (optional, failures logged)
//!        └─ broadcast full snapshot
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use trellis_core::{BoardError, ChatDraft, ChatMessage, IdGenerator, Intent};

use crate::broadcast::BroadcastChannel;
use crate::protocol::SessionId;
use crate::storage::SnapshotStore;
use crate::store::{BoardSnapshot, StateStore};

/// Outcome of an accepted intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// The board changed; this is the new snapshot.
    Applied(Arc<BoardSnapshot>),
    /// The intent was valid but produced the board that was already current.
    Unchanged { version: u64 },
}

impl Commit {
    pub fn version(&self) -> u64 {
        match self {
            Commit::Applied(snapshot) => snapshot.version,
            Commit::Unchanged { version } => *version,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Commit::Applied(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub committed: u64,
    pub unchanged: u64,
    pub rejected: u64,
    pub persist_failures: u64,
    pub chat_messages: u64,
}

#[derive(Default)]
struct AtomicResolverStats {
    committed: AtomicU64,
    unchanged: AtomicU64,
    rejected: AtomicU64,
    persist_failures: AtomicU64,
    chat_messages: AtomicU64,
}

struct Persistence {
    store: Arc<SnapshotStore>,
    board_key: String,
}

pub struct MutationResolver {
    store: Arc<StateStore>,
    channel: Arc<BroadcastChannel>,
    persistence: Option<Persistence>,
    ids: IdGenerator,
    write_lock: Mutex<()>,
    chat_lock: Mutex<()>,
    stats: AtomicResolverStats,
}

impl MutationResolver {
    pub fn new(store: Arc<StateStore>, channel: Arc<BroadcastChannel>) -> Self {
        Self {
            store,
            channel,
            persistence: None,
            ids: IdGenerator::new(),
            write_lock: Mutex::new(()),
            chat_lock: Mutex::new(()),
            stats: AtomicResolverStats::default(),
        }
    }

    /// Save every commit to `snapshots` under `board_key`.
    pub fn with_persistence(mut self, snapshots: Arc<SnapshotStore>, board_key: impl Into<String>) -> Self {
        self.persistence = Some(Persistence {
            store: snapshots,
            board_key: board_key.into(),
        });
        self
    }

    /// Validate and commit one intent.
    ///
    /// On error nothing changes and nothing is broadcast.
    pub async fn submit(&self, origin: Option<SessionId>, intent: Intent) -> Result<Commit, BoardError> {
        let _guard = self.write_lock.lock().await;
        let current = self.store.get().await;

        let next = match intent.apply(&current.board, &self.ids) {
            Ok(board) => board,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Rejected {} from {}: {e}", intent.name(), label(origin));
                return Err(e);
            }
        };

        if next == current.board {
            self.stats.unchanged.fetch_add(1, Ordering::Relaxed);
            log::trace!("{} from {} changed nothing (v{})", intent.name(), label(origin), current.version);
            return Ok(Commit::Unchanged {
                version: current.version,
            });
        }

        // No await point after the swap: a dropped caller cannot leave a
        // commit unpersisted or unbroadcast.
        let snapshot = self.store.replace(next).await;
        self.persist(&snapshot);
        if let Err(e) = self.channel.publish_board(&snapshot, origin) {
            log::warn!("Commit v{} not broadcast: {e}", snapshot.version);
        }

        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        log::debug!("Committed {} from {} as v{}", intent.name(), label(origin), snapshot.version);
        Ok(Commit::Applied(snapshot))
    }

    /// Append a chat message and relay it to every other observer.
    pub async fn post_chat(&self, origin: Option<SessionId>, draft: ChatDraft) -> Result<ChatMessage, BoardError> {
        let _guard = self.chat_lock.lock().await;
        let message = self.store.append_chat(draft, self.ids.next()).await?;
        if let Err(e) = self.channel.publish_chat(&message, origin) {
            log::warn!("Chat message {} not broadcast: {e}", message.id);
        }
        self.stats.chat_messages.fetch_add(1, Ordering::Relaxed);
        Ok(message)
    }

    fn persist(&self, snapshot: &BoardSnapshot) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let result = StateStore::dump(&snapshot.board)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                persistence
                    .store
                    .save_snapshot(&persistence.board_key, snapshot.version, &bytes)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "Failed to persist v{} of board '{}': {e}",
                snapshot.version,
                persistence.board_key
            );
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            committed: self.stats.committed.load(Ordering::Relaxed),
            unchanged: self.stats.unchanged.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            persist_failures: self.stats.persist_failures.load(Ordering::Relaxed),
            chat_messages: self.stats.chat_messages.load(Ordering::Relaxed),
        }
    }
}

fn label(origin: Option<SessionId>) -> String {
    origin.map_or_else(|| "http".to_string(), |id| id.to_string())
}
