pub mod file;
pub mod local;
pub mod memory;
pub mod slots;

pub use file::FileStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use slots::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("durable storage unavailable")]
    StorageUnavailable,
    #[error("storage quota exceeded while writing {key}")]
    QuotaExceeded { key: String },
    #[error("storage corrupt: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Io(String),
}

/// String key/value storage with the browser `Storage` contract.
///
/// Writes are synchronous and durable once they return `Ok`.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}
