//! # trellis-sync: real-time synchronization for a shared kanban board
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket (JSON)  ┌─────────────┐      HTTP      ┌──────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │ ◄────────────► │ http API │
//! │ (LocalView) │                     └──────┬──────┘                └────┬─────┘
//! └─────────────┘                            │        Engine              │
//!                                            ▼                            ▼
//!                                   ┌──────────────────┐
//!                                   │ MutationResolver │── SnapshotStore (RocksDB)
//!                                   └───┬──────────┬───┘
//!                                       ▼          ▼
//!                                 StateStore   BroadcastChannel
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire frames
//! - [`store`]: the live board snapshot and chat stream
//! - [`resolver`]: single-writer commit path
//! - [`broadcast`]: fan-out with explicit start/stop
//! - [`session`]: connected observers
//! - [`server`]: WebSocket server
//! - [`http`]: HTTP boundary
//! - [`client`]: WebSocket client with optimistic local view
//! - [`storage`]: RocksDB snapshot persistence
//! - [`config`]: server configuration

pub mod broadcast;
pub mod client;
pub mod config;
pub mod engine;
pub mod http;
pub mod protocol;
pub mod resolver;
pub mod server;
pub mod session;
pub mod storage;
pub mod store;

pub use broadcast::{BroadcastChannel, BroadcastError, BroadcastStats, Event};
pub use client::{ClientError, ConnectionState, LocalView, SyncClient, SyncEvent};
pub use config::{ConfigError, ServerConfig};
pub use engine::{Engine, EngineError};
pub use protocol::{ClientMessage, ErrorBody, ProtocolError, ServerMessage, SessionId, Topic};
pub use resolver::{Commit, MutationResolver, ResolverStats};
pub use server::{ServerError, ServerHandle, ServerStats, SyncServer};
pub use session::{SessionError, SessionInfo, SessionRegistry};
pub use storage::{SnapshotMetadata, SnapshotStore, StoreConfig, StoreError};
pub use store::{BoardSnapshot, StateStore};
