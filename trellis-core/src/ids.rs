use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::board::{Board, CardId, ListId};

/// Time-derived identifier source.
///
/// Values are milliseconds since the epoch, bumped past the previous value
/// when two requests land in the same millisecond, so the sequence is
/// strictly increasing for the lifetime of the generator.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = now_millis();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(prev.saturating_add(1).max(now))
            })
            .unwrap_or_else(|prev| prev);
        prev.saturating_add(1).max(now)
    }

    /// Next value not already used as a list id on `board`.
    pub fn next_list_id(&self, board: &Board) -> ListId {
        loop {
            let id = ListId(self.next());
            if !board.contains_list(id) {
                return id;
            }
        }
    }

    /// Next value not already used as a card id anywhere on `board`.
    pub fn next_card_id(&self, board: &Board) -> CardId {
        loop {
            let id = CardId(self.next());
            if !board.contains_card(id) {
                return id;
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
