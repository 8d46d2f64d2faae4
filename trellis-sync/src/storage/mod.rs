//! Persistent storage for board snapshots.
//!
//! ```text
//! ┌──────────────────┐  commit   ┌───────────────┐
//! │ MutationResolver │ ────────► │ SnapshotStore │
//! └────────┬─────────┘           │ (RocksDB)     │
//!          │                     └──────┬────────┘
//!          │ on startup                 │ column families
//!          ▼                            ▼
//! ┌──────────────────┐  ┌────────────────────────────────────┐
//! │ StateStore       │  │ CF "boards":  LZ4 JSON snapshots   │
//! │ (restored)       │  │ CF "metadata": version, sizes      │
//! └──────────────────┘  └────────────────────────────────────┘
//! ```

pub mod rocks;

pub use rocks::{SnapshotMetadata, SnapshotStore, StoreConfig, StoreError};
