//! Shard layer: registration, history replay, anchor computation and the
//! DAG attachment rules.
//!
//! A sharder serves one *active* shard at a time (the shard of the locally
//! registered application) but validates and records inbound transactions
//! for any shard. Multiple sharder instances may coexist in one process,
//! each with its own registration; all DAG state lives in the shared
//! repository, never in the sharder.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::constants::FIRST_SHARD_SEQ;
use crate::dto::{Anchor, Transaction};
use crate::repo::{DagNode, DltDb, RepoError};
use crate::TxHash;

/// Application-level rejection surfaced by a transaction handler.
///
/// The core propagates the message verbatim and never interprets it.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{0}")]
pub struct AppError(pub String);

/// Callback invoked for every transaction of the registered shard, both
/// during replay and on live dispatch.
pub type TxHandler = Box<dyn FnMut(&Transaction) -> Result<(), AppError> + Send>;

/// Errors from shard layer operations.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("no application shard registered")]
    NotRegistered,
    #[error("shard unknown")]
    ShardUnknown,
    #[error("missing shard id in transaction")]
    MissingShardId,
    #[error("parent transaction unknown for shard")]
    UnknownParent,
    #[error("genesis mismatch for first shard transaction")]
    GenesisMismatch,
    #[error("application handler rejected transaction: {0}")]
    App(#[from] AppError),
}

struct Registration {
    shard_id: Vec<u8>,
    handler: TxHandler,
}

/// The shard layer over a shared ledger repository.
pub struct Sharder {
    db: Arc<dyn DltDb>,
    active: Mutex<Option<Registration>>,
}

impl Sharder {
    pub fn new(db: Arc<dyn DltDb>) -> Self {
        Sharder {
            db,
            active: Mutex::new(None),
        }
    }

    fn active_guard(&self) -> MutexGuard<'_, Option<Registration>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the local application's shard and make it active.
    ///
    /// For a shard with no recorded DAG this writes the synthetic genesis
    /// (its id is the SHA-512 of the shard id) and seeds the tip set. For a
    /// known shard the recorded history is replayed to `handler` in
    /// ancestor order (breadth-first from the genesis children) before the
    /// call returns; a transaction's descendants are only replayed if the
    /// handler accepted it.
    ///
    /// The handler runs on the caller's thread against a consistent
    /// read-only view and must not call back into this sharder for the same
    /// shard.
    pub fn register(&self, shard_id: &[u8], handler: TxHandler) -> Result<(), ShardError> {
        let mut handler = handler;
        let genesis = Transaction::genesis(shard_id);

        match self.db.get_shard_dag_node(&genesis.id())? {
            None => {
                // new shard (or one whose DAG was flushed): the genesis
                // transaction may already exist in the tx table, which is
                // benign
                match self.db.add_tx(&genesis) {
                    Ok(()) | Err(RepoError::DuplicateTx) => {}
                    Err(e) => return Err(e.into()),
                }
                self.db.update_shard(&genesis)?;
                tracing::info!(
                    shard = %hex::encode(shard_id),
                    genesis = %genesis.id().short(),
                    "Registered new shard"
                );
            }
            Some(genesis_node) => {
                let replayed = self.replay(&genesis_node, &mut handler)?;
                tracing::info!(
                    shard = %hex::encode(shard_id),
                    transactions = replayed,
                    "Replayed known shard"
                );
            }
        }

        *self.active_guard() = Some(Registration {
            shard_id: shard_id.to_vec(),
            handler,
        });
        Ok(())
    }

    /// Breadth-first replay of a shard's recorded transactions, rooted at
    /// the genesis children. Returns the number of accepted transactions.
    fn replay(&self, genesis_node: &DagNode, handler: &mut TxHandler) -> Result<usize, ShardError> {
        let mut queue: VecDeque<TxHash> = genesis_node.children.iter().copied().collect();
        let mut replayed = 0;
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.db.get_shard_dag_node(&id)? else {
                continue;
            };
            let Some(tx) = self.db.get_tx(&node.tx_id)? else {
                continue;
            };
            match handler(&tx) {
                Ok(()) => {
                    replayed += 1;
                    queue.extend(node.children.iter().copied());
                }
                Err(e) => {
                    // the app rejected this transaction; its subtree is not
                    // replayed, the rest of the DAG still is
                    tracing::debug!(
                        tx = %tx.id().short(),
                        error = %e,
                        "Replay handler rejected transaction"
                    );
                }
            }
        }
        Ok(replayed)
    }

    /// Drop the active registration. The shard's DAG remains in storage.
    pub fn unregister(&self) {
        *self.active_guard() = None;
    }

    /// Shard id of the active registration, if any.
    pub fn active_shard(&self) -> Option<Vec<u8>> {
        self.active_guard().as_ref().map(|reg| reg.shard_id.clone())
    }

    /// Fill the shard-side fields of an anchor for the active shard.
    pub fn anchor(&self, a: &mut Anchor) -> Result<(), ShardError> {
        let shard_id = {
            let guard = self.active_guard();
            let reg = guard.as_ref().ok_or(ShardError::NotRegistered)?;
            reg.shard_id.clone()
        };
        self.fill_anchor(&shard_id, a)
    }

    /// Anchor against an arbitrary shard, used to negotiate sync with
    /// peers. `None` when the shard is unknown here.
    pub fn sync_anchor(&self, shard_id: &[u8]) -> Option<Anchor> {
        let mut a = Anchor::default();
        self.fill_anchor(shard_id, &mut a).ok()?;
        Some(a)
    }

    /// Tip selection: the deepest tip becomes the parent (ties broken by
    /// the larger tx id under big-endian byte comparison), every other tip
    /// becomes an uncle, and the weight accumulates all tip depths plus
    /// one. Deterministic for every node seeing the same tip set.
    fn fill_anchor(&self, shard_id: &[u8], a: &mut Anchor) -> Result<(), ShardError> {
        a.shard_id = shard_id.to_vec();

        let tips = self.db.shard_tips(shard_id)?;
        if tips.is_empty() {
            return Err(ShardError::ShardUnknown);
        }

        let mut parent = self.tip_node(&tips[0])?;
        let mut uncles = Vec::new();
        let mut weight = parent.depth;
        for tip in &tips[1..] {
            let node = self.tip_node(tip)?;
            weight += node.depth;
            if node.depth > parent.depth
                || (node.depth == parent.depth && node.tx_id > parent.tx_id)
            {
                uncles.push(parent.tx_id);
                parent = node;
            } else {
                uncles.push(node.tx_id);
            }
        }

        a.shard_parent = parent.tx_id;
        a.shard_seq = parent.depth + 1;
        a.weight = weight + 1;
        a.shard_uncles = uncles;
        Ok(())
    }

    fn tip_node(&self, tip: &TxHash) -> Result<DagNode, ShardError> {
        match self.db.get_shard_dag_node(tip)? {
            Some(node) => Ok(node),
            None => {
                tracing::warn!(tip = %tip.short(), "Tip without DAG node");
                Err(ShardError::ShardUnknown)
            }
        }
    }

    /// Record a locally submitted transaction: validate its anchor against
    /// the DAG, write the raw transaction and attach it.
    pub fn approve(&self, tx: &Transaction) -> Result<(), ShardError> {
        if self.active_guard().is_none() {
            return Err(ShardError::NotRegistered);
        }
        if tx.anchor.shard_id.is_empty() {
            return Err(ShardError::MissingShardId);
        }
        if self.db.get_shard_dag_node(&tx.anchor.shard_parent)?.is_none() {
            return Err(ShardError::UnknownParent);
        }
        self.db.add_tx(tx)?;
        self.db.update_shard(tx)?;
        Ok(())
    }

    /// Record a network transaction (already written by the endorsement
    /// layer) and dispatch it to the app when the active shard matches.
    ///
    /// The first transaction of an unseen shard carries shard sequence 1
    /// and must anchor on that shard's genesis; the genesis node is
    /// installed here on demand.
    pub fn handle(&self, tx: &Transaction) -> Result<(), ShardError> {
        if tx.anchor.shard_id.is_empty() {
            return Err(ShardError::MissingShardId);
        }

        if tx.anchor.shard_seq == FIRST_SHARD_SEQ {
            let genesis = Transaction::genesis(&tx.anchor.shard_id);
            if genesis.id() != tx.anchor.shard_parent {
                return Err(ShardError::GenesisMismatch);
            }
            if self.db.get_shard_dag_node(&genesis.id())?.is_none() {
                // the genesis transaction itself may already be recorded
                match self.db.add_tx(&genesis) {
                    Ok(()) | Err(RepoError::DuplicateTx) => {}
                    Err(e) => return Err(e.into()),
                }
                self.db.update_shard(&genesis)?;
                tracing::info!(
                    shard = %hex::encode(&tx.anchor.shard_id),
                    "Installed genesis for new shard"
                );
            }
        }

        if self.db.get_shard_dag_node(&tx.anchor.shard_parent)?.is_none() {
            return Err(ShardError::UnknownParent);
        }
        self.db.update_shard(tx)?;

        let mut guard = self.active_guard();
        if let Some(reg) = guard.as_mut() {
            if reg.shard_id == tx.anchor.shard_id {
                (reg.handler)(tx)?;
            }
        }
        Ok(())
    }
}
