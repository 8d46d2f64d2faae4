//! RocksDB-backed snapshot store.
//!
//! Column families:
//! - `boards`: latest board snapshot per board key (LZ4 compressed JSON)
//! - `metadata`: snapshot metadata (bincode: version, sizes, timestamps)
//!
//! Only the latest snapshot is kept; there is no history.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use trellis_core::BoardError;

const CF_BOARDS: &str = "boards";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_BOARDS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// fsync on every snapshot write (default: true, snapshots are rare and small)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 128)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trellis_data"),
            block_cache_size: 32 * 1024 * 1024,
            sync_writes: true,
            max_open_files: 128,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 32,
        }
    }
}

/// Metadata stored alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub board_key: String,
    /// Commit version of the stored snapshot
    pub version: u64,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    /// Compressed snapshot size in bytes
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl SnapshotMetadata {
    fn new(board_key: &str) -> Self {
        let now = now_secs();
        Self {
            board_key: board_key.to_string(),
            version: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),
    #[error("column family '{0}' not found")]
    MissingColumnFamily(&'static str),
    #[error("no snapshot stored for board '{0}'")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("persisted board is invalid: {0}")]
    InvalidBoard(#[from] BoardError),
}

/// Durable home of the latest snapshot of each board.
pub struct SnapshotStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl SnapshotStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Snapshot store opened at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        opts.set_block_based_table_factory(&block_opts);
        // Values are already LZ4 compressed by us.
        opts.set_compression_type(DBCompressionType::None);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    /// Save the snapshot for `board_key`, replacing the previous one.
    ///
    /// Snapshot and metadata are written in one batch.
    pub fn save_snapshot(
        &self,
        board_key: &str,
        version: u64,
        snapshot: &[u8],
    ) -> Result<SnapshotMetadata, StoreError> {
        let cf_boards = self.cf(CF_BOARDS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(snapshot);

        let mut meta = match self.load_metadata(board_key) {
            Ok(meta) => meta,
            Err(StoreError::NotFound(_)) => SnapshotMetadata::new(board_key),
            Err(e) => return Err(e),
        };
        meta.version = version;
        meta.snapshot_size = snapshot.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_boards, board_key.as_bytes(), &compressed);
        batch.put_cf(cf_meta, board_key.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Load the raw (decompressed) snapshot for `board_key`.
    pub fn load_snapshot(&self, board_key: &str) -> Result<Vec<u8>, StoreError> {
        let cf = self.cf(CF_BOARDS)?;
        match self.db.get_cf(cf, board_key.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map_err(|e| StoreError::Compression(e.to_string())),
            None => Err(StoreError::NotFound(board_key.to_string())),
        }
    }

    pub fn load_metadata(&self, board_key: &str) -> Result<SnapshotMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, board_key.as_bytes())? {
            Some(bytes) => SnapshotMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(board_key.to_string())),
        }
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &'static str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let (_dir, store) = open_temp();
        let payload = br#"{"lists":[{"listId":1,"title":"Todo","cards":[]}]}"#;

        let meta = store.save_snapshot("default", 3, payload).unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(meta.snapshot_size, payload.len() as u64);

        assert_eq!(store.load_snapshot("default").unwrap(), payload.to_vec());
        assert_eq!(store.load_metadata("default").unwrap().version, 3);
    }

    #[test]
    fn test_save_overwrites_and_keeps_created_at() {
        let (_dir, store) = open_temp();
        let first = store.save_snapshot("default", 1, b"{}").unwrap();
        let second = store.save_snapshot("default", 2, br#"{"lists":[]}"#).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.version, 2);
        assert_eq!(store.load_snapshot("default").unwrap(), br#"{"lists":[]}"#.to_vec());
    }

    #[test]
    fn test_missing_board() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.load_snapshot("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.load_metadata("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_snapshots_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.save_snapshot("default", 9, b"{\"lists\":[]}").unwrap();
            store.sync().unwrap();
        }
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(store.load_metadata("default").unwrap().version, 9);
    }

    #[test]
    fn test_large_snapshot_compresses() {
        let (_dir, store) = open_temp();
        let payload = vec![b'a'; 64 * 1024];
        let meta = store.save_snapshot("default", 1, &payload).unwrap();
        assert!(meta.compressed_size < meta.snapshot_size);
        assert_eq!(store.load_snapshot("default").unwrap(), payload);
    }
}
