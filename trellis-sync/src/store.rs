//! The State Store: the one live board snapshot plus the chat stream.
//!
//! Readers get an `Arc<BoardSnapshot>` and are never blocked by a commit
//! beyond the pointer swap. Only the resolver replaces the board.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use trellis_core::{Board, BoardError, ChatDraft, ChatMessage};

/// An immutable committed board state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardSnapshot {
    /// Commit number, starts at 0 for the initial (or recovered) board.
    pub version: u64,
    pub board: Board,
}

impl BoardSnapshot {
    pub fn new(version: u64, board: Board) -> Self {
        Self { version, board }
    }
}

struct ChatLog {
    messages: VecDeque<ChatMessage>,
    next_seq: u64,
    limit: usize,
}

impl ChatLog {
    fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit.min(1024)),
            next_seq: 0,
            limit,
        }
    }

    fn push(&mut self, draft: ChatDraft, fallback_id: u64) -> Result<ChatMessage, BoardError> {
        let message = draft.accept(self.next_seq, fallback_id)?;
        self.next_seq += 1;
        if self.limit == 0 {
            return Ok(message);
        }
        while self.messages.len() >= self.limit {
            self.messages.pop_front();
        }
        self.messages.push_back(message.clone());
        Ok(message)
    }
}

pub struct StateStore {
    current: RwLock<Arc<BoardSnapshot>>,
    chat: RwLock<ChatLog>,
}

impl StateStore {
    /// Empty board at version 0. `chat_limit` bounds the retained history.
    pub fn new(chat_limit: usize) -> Self {
        Self::with_board(Board::new(), 0, chat_limit)
    }

    pub fn with_board(board: Board, version: u64, chat_limit: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(BoardSnapshot::new(version, board))),
            chat: RwLock::new(ChatLog::new(chat_limit)),
        }
    }

    /// The current snapshot.
    pub async fn get(&self) -> Arc<BoardSnapshot> {
        self.current.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.current.read().await.version
    }

    /// Install `board` as the next version and return the new snapshot.
    pub(crate) async fn replace(&self, board: Board) -> Arc<BoardSnapshot> {
        let mut current = self.current.write().await;
        let next = Arc::new(BoardSnapshot::new(current.version + 1, board));
        *current = next.clone();
        next
    }

    /// Install a recovered board without bumping the version.
    pub(crate) async fn restore(&self, board: Board, version: u64) {
        *self.current.write().await = Arc::new(BoardSnapshot::new(version, board));
    }

    /// Parse a persisted `{ "lists": [...] }` document.
    pub fn load(persisted: &[u8]) -> Result<Board, BoardError> {
        let board: Board = serde_json::from_slice(persisted)?;
        board.validate()?;
        Ok(board)
    }

    pub fn dump(board: &Board) -> Result<Vec<u8>, BoardError> {
        Ok(serde_json::to_vec(board)?)
    }

    pub(crate) async fn append_chat(
        &self,
        draft: ChatDraft,
        fallback_id: u64,
    ) -> Result<ChatMessage, BoardError> {
        self.chat.write().await.push(draft, fallback_id)
    }

    /// Retained chat messages, oldest first.
    pub async fn chat_history(&self) -> Vec<ChatMessage> {
        self.chat.read().await.messages.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trellis_core::{BoardList, Card, CardId, ListId};

    fn generated_board(lists: u64, cards: u64) -> Board {
        let lists = (1..=lists)
            .map(|l| {
                let mut list = BoardList::new(ListId(l), format!("List {l}"));
                list.cards = (1..=cards)
                    .map(|c| {
                        let card = Card::new(CardId(l * 100 + c), format!("Card {c}"));
                        if c % 2 == 0 {
                            card.with_description(format!("notes for {c}"))
                        } else {
                            card
                        }
                    })
                    .collect();
                list
            })
            .collect();
        Board::from_lists(lists).unwrap()
    }

    #[test]
    fn test_load_dump_round_trip() {
        for (lists, cards) in [(0, 0), (1, 0), (1, 3), (4, 7), (10, 20)] {
            let board = generated_board(lists, cards);
            let bytes = StateStore::dump(&board).unwrap();
            assert_eq!(StateStore::load(&bytes).unwrap(), board);
        }
    }

    fn arbitrary_board() -> impl Strategy<Value = Board> {
        let title = "[A-Za-z][A-Za-z0-9 _#-]{0,16}";
        let card = (title, prop::option::of(any::<String>()));
        (
            prop::collection::btree_set(any::<u64>(), 0..6),
            prop::collection::vec(prop::collection::vec(card, 0..8), 6),
            prop::collection::vec(title, 6),
            any::<u64>(),
        )
            .prop_map(|(list_ids, cards, titles, first_card)| {
                let mut next_card = first_card;
                let lists = list_ids
                    .into_iter()
                    .zip(cards.into_iter().zip(titles))
                    .map(|(id, (cards, title))| {
                        let mut list = BoardList::new(ListId(id), title);
                        list.cards = cards
                            .into_iter()
                            .map(|(title, description)| {
                                let mut card = Card::new(CardId(next_card), title);
                                card.description = description;
                                next_card = next_card.wrapping_add(1);
                                card
                            })
                            .collect();
                        list
                    })
                    .collect();
                Board::from_lists(lists).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_load_inverts_dump(board in arbitrary_board()) {
            let bytes = StateStore::dump(&board).unwrap();
            prop_assert_eq!(StateStore::load(&bytes).unwrap(), board);
        }
    }

    #[test]
    fn test_load_accepts_original_field_names() {
        let raw = br#"{"lists":[{"list_id":1,"title":"Todo","cards":[{"card_id":2,"title":"a"}]}]}"#;
        let board = StateStore::load(raw).unwrap();
        assert!(board.contains_card(CardId(2)));
    }

    #[test]
    fn test_load_rejects_invalid_layout() {
        assert_eq!(StateStore::load(br#"{"lists": 5}"#).unwrap_err().kind(), "malformed_input");
        let dup = br#"{"lists":[{"listId":1,"title":"A"},{"listId":1,"title":"B"}]}"#;
        assert_eq!(StateStore::load(dup).unwrap_err().kind(), "malformed_input");
    }

    #[test]
    fn test_load_requires_lists_key() {
        assert_eq!(StateStore::load(b"{}").unwrap_err().kind(), "malformed_input");
        assert_eq!(StateStore::load(br#"{"list":[]}"#).unwrap_err().kind(), "malformed_input");
    }

    #[tokio::test]
    async fn test_replace_bumps_version() {
        let store = StateStore::new(10);
        assert_eq!(store.version().await, 0);

        let before = store.get().await;
        let snap = store.replace(generated_board(1, 1)).await;
        assert_eq!(snap.version, 1);
        assert_eq!(store.get().await.version, 1);

        // Readers holding the old snapshot keep seeing it.
        assert_eq!(before.version, 0);
        assert!(before.board.lists.is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_version() {
        let store = StateStore::new(10);
        store.restore(generated_board(2, 2), 41).await;
        let snap = store.get().await;
        assert_eq!(snap.version, 41);
        assert_eq!(snap.board.card_count(), 4);
    }

    #[tokio::test]
    async fn test_chat_history_bounded() {
        let store = StateStore::new(2);
        for i in 0..3u64 {
            store.append_chat(ChatDraft::new(format!("m{i}")), i).await.unwrap();
        }
        let history = store.chat_history().await;
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m1", "m2"]);
        assert_eq!(history[1].seq, 2);
    }

    #[tokio::test]
    async fn test_blank_chat_not_appended() {
        let store = StateStore::new(10);
        assert!(store.append_chat(ChatDraft::new(""), 1).await.is_err());
        assert!(store.chat_history().await.is_empty());
    }
}
