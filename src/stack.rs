//! The DLT facade: wires the repository, shard layer and endorser together
//! behind the application-facing interface.
//!
//! Outbound flow (`submit`): the endorser validates the submitter side of
//! the anchor, the shard layer computes the shard side and attaches the
//! transaction (writing it in the process), and finally the endorser
//! records submitter history. Inbound flow (`handle`): the endorser writes
//! the transaction and submitter history first, then the shard layer
//! attaches it and dispatches to the registered application.
//!
//! Failures abort and propagate without undo. The design is append-only: a
//! partially applied inbound transaction leaves a record in the
//! transaction table that is not attached anywhere, which is benign
//! because unattached transactions are unreachable via tips or DAG
//! traversal.

use std::sync::{Arc, Mutex};

use crate::config::WeftConfig;
use crate::crypto::{KeyError, NodeKeypair};
use crate::dto::{Anchor, Transaction, TxRequest};
use crate::endorse::{EndorseError, Endorser};
use crate::repo::{DltDb, LedgerDb, RepoError};
use crate::shard::{ShardError, Sharder, TxHandler};
use crate::state::{Resource, StateError, WorldState};
use crate::storage::{DbProvider, SledProvider, StorageError};
use crate::TxHash;

/// Errors surfaced by the facade.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("no application registered")]
    NotRegistered,
    #[error("an application is already registered")]
    AlreadyRegistered,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("request shard does not match registered shard")]
    ShardMismatch,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Shard(#[from] ShardError),
    #[error(transparent)]
    Endorse(#[from] EndorseError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// A weft node's ledger stack.
///
/// Several stacks may coexist in one process (each over its own provider),
/// which is how conflicting-submitter scenarios are exercised in tests.
pub struct DltStack {
    provider: Arc<dyn DbProvider>,
    db: Arc<LedgerDb>,
    sharder: Sharder,
    endorser: Endorser,
    node_key: NodeKeypair,
    world_state: Mutex<Option<WorldState>>,
}

impl DltStack {
    /// Assemble a stack over an existing provider with a given identity.
    pub fn new(provider: Arc<dyn DbProvider>, node_key: NodeKeypair) -> Result<Self, StackError> {
        let db = Arc::new(LedgerDb::new(provider.as_ref())?);
        let shared: Arc<dyn DltDb> = db.clone();
        Ok(DltStack {
            provider,
            db,
            sharder: Sharder::new(shared.clone()),
            endorser: Endorser::new(shared),
            node_key,
            world_state: Mutex::new(None),
        })
    }

    /// Open a stack from configuration: sled database under the data
    /// directory, node key loaded from (or generated into) the key file.
    pub fn open(config: &WeftConfig) -> Result<Self, StackError> {
        let data_dir = std::path::Path::new(&config.node.data_dir);
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let provider = SledProvider::open_with_cache(
            &data_dir.join("ledger"),
            config.node.db_cache_mb,
        )?;
        let node_key = NodeKeypair::load_or_generate(&config.key_path())?;
        tracing::info!(
            data_dir = %data_dir.display(),
            node = %hex::encode(&node_key.public_bytes()[..8]),
            "Opened ledger stack"
        );
        Self::new(Arc::new(provider), node_key)
    }

    /// This node's identity, as placed on issued anchors.
    pub fn node_id(&self) -> Vec<u8> {
        self.node_key.public_bytes()
    }

    /// Register the local application for `shard_id`, replaying recorded
    /// shard history to `handler` before returning.
    pub fn register(&self, shard_id: &[u8], handler: TxHandler) -> Result<(), StackError> {
        if shard_id.is_empty() {
            return Err(StackError::InvalidRequest("empty shard id"));
        }
        if self.sharder.active_shard().is_some() {
            return Err(StackError::AlreadyRegistered);
        }
        self.sharder.register(shard_id, handler)?;
        let state = WorldState::open(self.provider.as_ref(), shard_id)?;
        *self.lock_state() = Some(state);
        Ok(())
    }

    /// Unregister the application. Ledger and world state stay on disk.
    pub fn unregister(&self) {
        self.sharder.unregister();
        *self.lock_state() = None;
    }

    /// Issue an anchor binding the submitter's next transaction into the
    /// active shard, signed by this node.
    pub fn anchor(
        &self,
        submitter_id: &[u8],
        submitter_seq: u64,
        last_tx: TxHash,
    ) -> Result<Anchor, StackError> {
        if submitter_id.is_empty() {
            return Err(StackError::InvalidRequest("empty submitter id"));
        }
        let mut a = Anchor {
            submitter_id: submitter_id.to_vec(),
            submitter_seq,
            submitter_last_tx: last_tx,
            ..Anchor::default()
        };
        self.endorser.anchor(&a)?;
        self.sharder.anchor(&mut a)?;
        a.node_id = self.node_key.public_bytes();
        a.signature = self.node_key.sign(a.signing_digest().as_bytes());
        Ok(a)
    }

    /// Anchor for negotiating sync against an arbitrary shard; `None` when
    /// the shard is unknown here.
    pub fn sync_anchor(&self, shard_id: &[u8]) -> Option<Anchor> {
        let mut a = self.sharder.sync_anchor(shard_id)?;
        a.node_id = self.node_key.public_bytes();
        a.signature = self.node_key.sign(a.signing_digest().as_bytes());
        Some(a)
    }

    /// Submit a locally originated transaction request.
    ///
    /// The request must target the registered shard and carry the
    /// submitter's signature; the stack issues the anchor, attaches the
    /// transaction to the shard DAG and records submitter history.
    pub fn submit(&self, request: TxRequest) -> Result<Transaction, StackError> {
        if request.payload.is_empty() {
            return Err(StackError::InvalidRequest("empty payload"));
        }
        if request.signature.is_empty() {
            return Err(StackError::InvalidRequest("missing signature"));
        }
        if request.shard_id.is_empty() {
            return Err(StackError::InvalidRequest("empty shard id"));
        }
        if request.submitter_id.is_empty() {
            return Err(StackError::InvalidRequest("empty submitter id"));
        }
        match self.sharder.active_shard() {
            None => return Err(StackError::NotRegistered),
            Some(active) if active != request.shard_id => {
                return Err(StackError::ShardMismatch)
            }
            Some(_) => {}
        }

        let anchor = self.anchor(
            &request.submitter_id,
            request.submitter_seq,
            request.last_tx,
        )?;
        let tx = Transaction::new(request, anchor);
        self.sharder.approve(&tx)?;
        self.endorser.approve(&tx)?;
        tracing::info!(
            tx = %tx.id().short(),
            shard = %hex::encode(&tx.anchor.shard_id),
            seq = tx.anchor.shard_seq,
            "Submitted transaction"
        );
        Ok(tx)
    }

    /// Handle a transaction arriving from the network.
    pub fn handle(&self, tx: &Transaction) -> Result<(), StackError> {
        self.endorser.handle(tx)?;
        self.sharder.handle(tx)?;
        tracing::debug!(
            tx = %tx.id().short(),
            shard = %hex::encode(&tx.anchor.shard_id),
            "Handled network transaction"
        );
        Ok(())
    }

    /// Read a resource from the registered shard's world state.
    pub fn get_state(&self, key: &[u8]) -> Result<Resource, StackError> {
        let guard = self.lock_state();
        let state = guard.as_ref().ok_or(StackError::NotRegistered)?;
        Ok(state.get(key)?)
    }

    /// World-state write access for the registered application's handler.
    pub fn with_state<R>(
        &self,
        f: impl FnOnce(&WorldState) -> Result<R, StateError>,
    ) -> Result<R, StackError> {
        let guard = self.lock_state();
        let state = guard.as_ref().ok_or(StackError::NotRegistered)?;
        Ok(f(state)?)
    }

    /// Drop a shard's DAG structure and tips. Transactions and world state
    /// are retained; the shard becomes unknown until re-registered or
    /// repopulated from the network.
    pub fn flush(&self, shard_id: &[u8]) -> Result<(), StackError> {
        self.db.flush_shard(shard_id)?;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<WorldState>> {
        self.world_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
