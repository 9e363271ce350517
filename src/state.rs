//! Per-shard world state.
//!
//! Applications read and write [`Resource`] records keyed by opaque bytes.
//! Each shard gets its own logical database so state never leaks across
//! shards; the ledger core itself only ever reads this store (through the
//! facade's uniform `get_state` path) — interpreting and mutating resources
//! is application territory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::{Database, DbProvider, StorageError};

/// Errors from world state access.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("resource not found")]
    NotFound,
}

/// An application resource: an owned value under an opaque key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub key: Vec<u8>,
    /// Submitter id of the current owner.
    pub owner: Vec<u8>,
    pub value: Vec<u8>,
}

/// World state of a single shard.
pub struct WorldState {
    db: Arc<dyn Database>,
}

impl WorldState {
    /// Open the world state database of `shard_id` on the given provider.
    pub fn open(provider: &dyn DbProvider, shard_id: &[u8]) -> Result<Self, StateError> {
        let name = format!("weft_state_{}", hex::encode(shard_id));
        Ok(WorldState {
            db: provider.db(&name)?,
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Resource, StateError> {
        match self.db.get(key)? {
            Some(data) => bincode::deserialize(&data)
                .map_err(|e| StorageError::Serialization(e.to_string()).into()),
            None => Err(StateError::NotFound),
        }
    }

    pub fn put(&self, resource: &Resource) -> Result<(), StateError> {
        let data = bincode::serialize(resource)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.db.put(&resource.key, &data)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StateError> {
        self.db.delete(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SledProvider;

    #[test]
    fn resource_roundtrip() {
        let provider = SledProvider::open_temporary().unwrap();
        let state = WorldState::open(&provider, b"shard-1").unwrap();
        let resource = Resource {
            key: b"account/alice".to_vec(),
            owner: b"alice".to_vec(),
            value: b"100".to_vec(),
        };

        assert!(matches!(
            state.get(b"account/alice"),
            Err(StateError::NotFound)
        ));
        state.put(&resource).unwrap();
        assert_eq!(state.get(b"account/alice").unwrap(), resource);

        state.delete(b"account/alice").unwrap();
        assert!(matches!(
            state.get(b"account/alice"),
            Err(StateError::NotFound)
        ));
    }

    #[test]
    fn state_is_scoped_per_shard() {
        let provider = SledProvider::open_temporary().unwrap();
        let first = WorldState::open(&provider, b"shard-1").unwrap();
        let second = WorldState::open(&provider, b"shard-2").unwrap();

        first
            .put(&Resource {
                key: b"key".to_vec(),
                owner: b"alice".to_vec(),
                value: b"value".to_vec(),
            })
            .unwrap();
        assert!(matches!(second.get(b"key"), Err(StateError::NotFound)));
    }
}
