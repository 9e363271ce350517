//! Abstract key/value storage for the ledger core.
//!
//! Higher layers never talk to an engine directly; they ask a [`DbProvider`]
//! for named logical databases and speak the tiny [`Database`] byte-store
//! contract. The production provider wraps a sled database, vending one sled
//! tree per logical name; tests use a temporary (in-memory-backed) sled
//! instance.

use std::sync::Arc;

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A named logical database: an opaque byte-keyed byte store.
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
    fn has(&self, key: &[u8]) -> Result<bool, StorageError>;
    /// Delete `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
    fn flush(&self) -> Result<(), StorageError>;
}

/// Factory for named logical databases sharing one underlying engine.
pub trait DbProvider: Send + Sync {
    fn db(&self, name: &str) -> Result<Arc<dyn Database>, StorageError>;
}

/// Sled-backed provider; each logical database is a sled tree.
pub struct SledProvider {
    db: sled::Db,
}

impl SledProvider {
    /// Open or create a sled database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(SledProvider { db })
    }

    /// Open with an explicit cache budget in megabytes.
    pub fn open_with_cache(path: &std::path::Path, cache_mb: u64) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path)
            .cache_capacity(cache_mb * 1024 * 1024)
            .open()
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(SledProvider { db })
    }

    /// Open a temporary sled database (for testing).
    pub fn open_temporary() -> Result<Self, StorageError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(SledProvider { db })
    }
}

impl DbProvider for SledProvider {
    fn db(&self, name: &str) -> Result<Arc<dyn Database>, StorageError> {
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(Arc::new(SledDatabase { tree }))
    }
}

struct SledDatabase {
    tree: sled::Tree,
}

impl Database for SledDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.tree
            .insert(key, value)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        self.tree
            .contains_key(key)
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.tree
            .remove(key)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.tree
            .flush()
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }
}
