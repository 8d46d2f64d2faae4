//! Mutation intents: what a client asks the resolver to do.
//!
//! Wire form is a JSON object tagged by `kind`:
//! ```text
//! { "kind": "move_card", "cardId": 7, "fromList": 1, "fromIndex": 0,
//!   "toList": 2, "toIndex": 0 }
//! ```

use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardList, Card, CardId, Index, IndexBasis, ListId};
use crate::error::{BoardError, Result};
use crate::ids::IdGenerator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Intent {
    InsertList {
        #[serde(default, alias = "list_id")]
        list_id: Option<ListId>,
        title: String,
    },
    RemoveList {
        #[serde(alias = "list_id")]
        list_id: ListId,
    },
    ReorderLists {
        from_index: Index,
        to_index: Index,
        #[serde(default)]
        basis: IndexBasis,
    },
    InsertCard {
        #[serde(alias = "list_id")]
        list_id: ListId,
        #[serde(default, alias = "card_id")]
        card_id: Option<CardId>,
        title: String,
        #[serde(default)]
        description: Option<String>,
    },
    RemoveCard {
        #[serde(alias = "list_id")]
        list_id: ListId,
        #[serde(alias = "card_id")]
        card_id: CardId,
    },
    MoveCard {
        #[serde(alias = "card_id")]
        card_id: CardId,
        from_list: ListId,
        from_index: Index,
        to_list: ListId,
        to_index: Index,
        #[serde(default)]
        basis: IndexBasis,
    },
    /// Full replacement: the given lists become the canonical board.
    ReplaceBoard { lists: Vec<BoardList> },
}

impl Intent {
    pub fn move_card(card_id: CardId, from_list: ListId, from_index: Index, to_list: ListId, to_index: Index) -> Self {
        Intent::MoveCard {
            card_id,
            from_list,
            from_index,
            to_list,
            to_index,
            basis: IndexBasis::AfterRemoval,
        }
    }

    pub fn reorder_lists(from_index: Index, to_index: Index) -> Self {
        Intent::ReorderLists {
            from_index,
            to_index,
            basis: IndexBasis::AfterRemoval,
        }
    }

    pub fn replace(board: Board) -> Self {
        Intent::ReplaceBoard { lists: board.lists }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intent::InsertList { .. } => "insert_list",
            Intent::RemoveList { .. } => "remove_list",
            Intent::ReorderLists { .. } => "reorder_lists",
            Intent::InsertCard { .. } => "insert_card",
            Intent::RemoveCard { .. } => "remove_card",
            Intent::MoveCard { .. } => "move_card",
            Intent::ReplaceBoard { .. } => "replace_board",
        }
    }

    /// Compute the board this intent produces from `board`.
    ///
    /// Missing identifiers on inserts are drawn from `ids`. A `MoveCard`
    /// whose stated source slot no longer holds the card falls back to
    /// wherever the card is now; if it is gone the intent is stale.
    pub fn apply(&self, board: &Board, ids: &IdGenerator) -> Result<Board> {
        match self {
            Intent::InsertList { list_id, title } => {
                let id = list_id.unwrap_or_else(|| ids.next_list_id(board));
                board.insert_list(id, title.clone())
            }
            Intent::RemoveList { list_id } => board.remove_list(*list_id),
            Intent::ReorderLists { from_index, to_index, basis } => {
                board.reorder_lists_with(*from_index, *to_index, *basis)
            }
            Intent::InsertCard { list_id, card_id, title, description } => {
                let id = card_id.unwrap_or_else(|| ids.next_card_id(board));
                let mut card = Card::new(id, title.clone());
                card.description = description.clone();
                board.push_card(*list_id, card)
            }
            Intent::RemoveCard { list_id, card_id } => board.remove_card(*list_id, *card_id),
            Intent::MoveCard { card_id, from_list, from_index, to_list, to_index, basis } => {
                apply_move(board, *card_id, *from_list, *from_index, *to_list, *to_index, *basis)
            }
            Intent::ReplaceBoard { lists } => Board::from_lists(lists.clone()),
        }
    }
}

fn apply_move(
    board: &Board,
    card_id: CardId,
    from_list: ListId,
    from_index: Index,
    to_list: ListId,
    to_index: Index,
    basis: IndexBasis,
) -> Result<Board> {
    for index in [from_index, to_index] {
        if index < 0 {
            return Err(BoardError::InvalidIndex(index));
        }
    }

    let stated = board
        .list(from_list)
        .and_then(|l| l.cards.get(from_index as usize))
        .is_some_and(|c| c.id == card_id);

    if stated {
        return board.move_card_with(from_list, from_index, to_list, to_index, basis);
    }

    match board.locate_card(card_id) {
        Some((list, index)) => {
            log::debug!(
                "card {card_id} moved since intent was issued: expected {from_list}[{from_index}], found {list}[{index}]"
            );
            board.move_card_with(list, index as Index, to_list, to_index, basis)
        }
        None => Err(BoardError::StaleReference(card_id)),
    }
}
