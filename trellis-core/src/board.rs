//! Ordered container model: a board owns lists, a list owns cards.
//!
//! Every operation takes `&self` and returns a fresh [`Board`], so a failed
//! operation can never leave a half-applied value behind. Positions are
//! signed on input: a negative index is rejected, a destination index past
//! the end appends.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result, Target};

/// Caller-facing position. Signed so negative input can be reported instead of wrapping.
pub type Index = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub u64);

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ListId {
    fn from(raw: u64) -> Self {
        ListId(raw)
    }
}

impl From<u64> for CardId {
    fn from(raw: u64) -> Self {
        CardId(raw)
    }
}

/// How a destination index is read when an element moves.
///
/// `AfterRemoval` is the element's index once the move is done (what
/// drag-and-drop widgets report). `BeforeRemoval` addresses the sequence as
/// the originator saw it, element still in place: within one container a
/// forward move is shifted down by one because the removal closes a gap in
/// front of the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBasis {
    #[default]
    AfterRemoval,
    BeforeRemoval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "cardId", alias = "card_id")]
    pub id: CardId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Card {
    pub fn new(id: CardId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardList {
    #[serde(rename = "listId", alias = "list_id")]
    pub id: ListId,
    pub title: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl BoardList {
    pub fn new(id: ListId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            cards: Vec::new(),
        }
    }

    pub fn card_ids(&self) -> Vec<CardId> {
        self.cards.iter().map(|c| c.id).collect()
    }

    fn card_position(&self, card: CardId) -> Option<usize> {
        self.cards.iter().position(|c| c.id == card)
    }
}

/// The root aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub lists: Vec<BoardList>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lists(lists: Vec<BoardList>) -> Result<Self> {
        let board = Self { lists };
        board.validate()?;
        Ok(board)
    }

    pub fn list(&self, id: ListId) -> Option<&BoardList> {
        self.lists.iter().find(|l| l.id == id)
    }

    pub fn contains_list(&self, id: ListId) -> bool {
        self.list(id).is_some()
    }

    pub fn contains_card(&self, card: CardId) -> bool {
        self.locate_card(card).is_some()
    }

    /// Where a card currently sits: owning list and index within it.
    pub fn locate_card(&self, card: CardId) -> Option<(ListId, usize)> {
        self.lists
            .iter()
            .find_map(|l| l.card_position(card).map(|i| (l.id, i)))
    }

    pub fn card_ids(&self) -> impl Iterator<Item = CardId> + '_ {
        self.lists.iter().flat_map(|l| l.cards.iter().map(|c| c.id))
    }

    pub fn card_count(&self) -> usize {
        self.lists.iter().map(|l| l.cards.len()).sum()
    }

    /// Check the structural invariants: unique list ids, globally unique
    /// card ids, non-blank titles.
    pub fn validate(&self) -> Result<()> {
        let mut lists = HashSet::new();
        let mut cards = HashSet::new();
        for list in &self.lists {
            if !lists.insert(list.id) {
                return Err(BoardError::MalformedInput(format!("list {} appears more than once", list.id)));
            }
            check_title("list", &list.title)?;
            for card in &list.cards {
                if !cards.insert(card.id) {
                    return Err(BoardError::MalformedInput(format!("card {} appears more than once", card.id)));
                }
                check_title("card", &card.title)?;
            }
        }
        Ok(())
    }

    pub fn insert_list(&self, id: ListId, title: impl Into<String>) -> Result<Board> {
        let title = title.into();
        check_title("list", &title)?;
        if self.contains_list(id) {
            return Err(BoardError::DuplicateId(format!("list {id}")));
        }
        let mut next = self.clone();
        next.lists.push(BoardList::new(id, title));
        Ok(next)
    }

    /// Remove a list together with every card it holds.
    pub fn remove_list(&self, id: ListId) -> Result<Board> {
        let at = self.list_position(id)?;
        let mut next = self.clone();
        next.lists.remove(at);
        Ok(next)
    }

    pub fn reorder_lists(&self, from_index: Index, to_index: Index) -> Result<Board> {
        self.reorder_lists_with(from_index, to_index, IndexBasis::AfterRemoval)
    }

    pub fn reorder_lists_with(&self, from_index: Index, to_index: Index, basis: IndexBasis) -> Result<Board> {
        let from = to_position(from_index)?;
        let to = to_position(to_index)?;
        if from >= self.lists.len() {
            return Err(BoardError::NotFound(Target::ListAt(from)));
        }
        let mut next = self.clone();
        let list = next.lists.remove(from);
        let at = destination(from, to, next.lists.len(), true, basis);
        next.lists.insert(at, list);
        Ok(next)
    }

    pub fn insert_card(&self, list_id: ListId, card_id: CardId, title: impl Into<String>) -> Result<Board> {
        self.push_card(list_id, Card::new(card_id, title))
    }

    /// Append a fully built card to the end of a list.
    pub fn push_card(&self, list_id: ListId, card: Card) -> Result<Board> {
        check_title("card", &card.title)?;
        let at = self.list_position(list_id)?;
        if self.contains_card(card.id) {
            return Err(BoardError::DuplicateId(format!("card {}", card.id)));
        }
        let mut next = self.clone();
        next.lists[at].cards.push(card);
        Ok(next)
    }

    pub fn remove_card(&self, list_id: ListId, card_id: CardId) -> Result<Board> {
        let at = self.list_position(list_id)?;
        let index = self.lists[at]
            .card_position(card_id)
            .ok_or(BoardError::NotFound(Target::Card { list: list_id, card: card_id }))?;
        let mut next = self.clone();
        next.lists[at].cards.remove(index);
        Ok(next)
    }

    pub fn move_card(
        &self,
        from_list: ListId,
        from_index: Index,
        to_list: ListId,
        to_index: Index,
    ) -> Result<Board> {
        self.move_card_with(from_list, from_index, to_list, to_index, IndexBasis::AfterRemoval)
    }

    pub fn move_card_with(
        &self,
        from_list: ListId,
        from_index: Index,
        to_list: ListId,
        to_index: Index,
        basis: IndexBasis,
    ) -> Result<Board> {
        let from = to_position(from_index)?;
        let to = to_position(to_index)?;
        let src = self.list_position(from_list)?;
        let dst = self.list_position(to_list)?;
        if from >= self.lists[src].cards.len() {
            return Err(BoardError::NotFound(Target::CardAt { list: from_list, index: from }));
        }

        let mut next = self.clone();
        let card = next.lists[src].cards.remove(from);
        let at = destination(from, to, next.lists[dst].cards.len(), src == dst, basis);
        next.lists[dst].cards.insert(at, card);
        Ok(next)
    }

    fn list_position(&self, id: ListId) -> Result<usize> {
        self.lists
            .iter()
            .position(|l| l.id == id)
            .ok_or(BoardError::NotFound(Target::List(id)))
    }
}

fn to_position(index: Index) -> Result<usize> {
    usize::try_from(index).map_err(|_| BoardError::InvalidIndex(index))
}

fn check_title(what: &str, title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(BoardError::MalformedInput(format!("{what} title must not be empty")));
    }
    Ok(())
}

/// Insertion point for an element removed from `from`, given the length of
/// the destination once the element is out of it.
fn destination(from: usize, to: usize, len_after_removal: usize, same_container: bool, basis: IndexBasis) -> usize {
    let to = match basis {
        IndexBasis::BeforeRemoval if same_container && from < to => to - 1,
        _ => to,
    };
    to.min(len_after_removal)
}
