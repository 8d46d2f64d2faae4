//! # trellis-core: board model for the Trellis sync engine
//!
//! Pure data and pure operations, no I/O:
//!
//! - [`board`]: `Board` / `BoardList` / `Card` with ordering invariants
//! - [`intent`]: mutation intents and how they apply to a board
//! - [`ids`]: time-derived identifier generation
//! - [`chat`]: chat stream entries
//! - [`error`]: the mutation error taxonomy

pub mod board;
pub mod chat;
pub mod error;
pub mod ids;
pub mod intent;

pub use board::{Board, BoardList, Card, CardId, Index, IndexBasis, ListId};
pub use chat::{ChatDraft, ChatMessage};
pub use error::{BoardError, Result, Target};
pub use ids::IdGenerator;
pub use intent::Intent;
