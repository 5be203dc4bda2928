//! Durable storage medium behind the stream stores
//!
//! Every stream keeps an append-only log of its datapoints plus a small
//! metadata document. Backends only see opaque keys and bytes.

pub mod file;

pub use file::FileBackend;

use std::path::Path;

/// Trait for persistence backends
pub trait PersistenceBackend: Send + Sync {
    /// Append bytes to the end of the object under `key`, creating it if needed
    fn append(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError>;

    /// Replace the object under `key` atomically
    fn write(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError>;

    /// Read data from persistence
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Cut the object under `key` back to its first `len` bytes
    fn truncate(&self, key: &str, len: u64) -> Result<(), PersistenceError>;

    /// Delete data from persistence
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// List all keys
    fn list_keys(&self) -> Result<Vec<String>, PersistenceError>;

    /// Sync to disk
    fn sync(&self) -> Result<(), PersistenceError>;
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Base directory for persistence files
    pub data_dir: std::path::PathBuf,
    /// Fsync after every append instead of waiting for the sync worker
    pub sync_on_append: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: std::path::PathBuf::from("./brook_data"),
            sync_on_append: false,
        }
    }
}

impl PersistenceConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_sync_on_append(mut self, enabled: bool) -> Self {
        self.sync_on_append = enabled;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),
}
