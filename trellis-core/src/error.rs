use std::fmt;

use thiserror::Error;

use crate::board::{CardId, ListId};

pub type Result<T> = std::result::Result<T, BoardError>;

/// What a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    List(ListId),
    Card { list: ListId, card: CardId },
    ListAt(usize),
    CardAt { list: ListId, index: usize },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::List(id) => write!(f, "list {id}"),
            Target::Card { list, card } => write!(f, "card {card} in list {list}"),
            Target::ListAt(index) => write!(f, "list at position {index}"),
            Target::CardAt { list, index } => write!(f, "card at position {index} in list {list}"),
        }
    }
}

/// Failures of a board mutation. None of them leaves a partially applied board behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("{0} not found")]
    NotFound(Target),
    #[error("invalid index {0}: indices must not be negative")]
    InvalidIndex(i64),
    #[error("card {0} no longer exists on the board")]
    StaleReference(CardId),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("identifier already in use: {0}")]
    DuplicateId(String),
}

impl BoardError {
    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BoardError::NotFound(_) => "not_found",
            BoardError::InvalidIndex(_) => "invalid_index",
            BoardError::StaleReference(_) => "stale_reference",
            BoardError::MalformedInput(_) => "malformed_input",
            BoardError::DuplicateId(_) => "duplicate_id",
        }
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(e: serde_json::Error) -> Self {
        BoardError::MalformedInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(BoardError::NotFound(Target::List(ListId(1))).kind(), "not_found");
        assert_eq!(BoardError::InvalidIndex(-1).kind(), "invalid_index");
        assert_eq!(BoardError::StaleReference(CardId(3)).kind(), "stale_reference");
        assert_eq!(BoardError::MalformedInput("x".into()).kind(), "malformed_input");
        assert_eq!(BoardError::DuplicateId("list 1".into()).kind(), "duplicate_id");
    }

    #[test]
    fn test_error_messages() {
        let err = BoardError::NotFound(Target::CardAt { list: ListId(7), index: 2 });
        assert_eq!(err.to_string(), "card at position 2 in list 7 not found");

        let err = BoardError::InvalidIndex(-4);
        assert!(err.to_string().contains("-4"));
    }
}
