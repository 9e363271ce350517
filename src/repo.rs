//! The ledger repository: persistence layout and append-only rules.
//!
//! Four logical tables over the storage provider:
//! - `weft_transactions` — raw transactions keyed by id
//! - `weft_shard_dags` — [`DagNode`] structure records keyed by tx id
//! - `weft_shard_tips` — the tip list of each shard, keyed by shard id
//! - `weft_submitter_history` — [`SubmitterHistory`] keyed by
//!   submitter ‖ `:` ‖ big-endian sequence
//!
//! The repository is the single synchronization boundary of the core: every
//! multi-key operation holds the write side of one process-wide lock, pure
//! reads hold the read side. Shard and endorsement layers keep no DAG state
//! of their own between calls.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::HISTORY_KEY_SEPARATOR;
use crate::dto::Transaction;
use crate::storage::{Database, DbProvider, StorageError};
use crate::TxHash;

const TX_DB: &str = "weft_transactions";
const SHARD_DAG_DB: &str = "weft_shard_dags";
const SHARD_TIPS_DB: &str = "weft_shard_tips";
const SUBMITTER_HISTORY_DB: &str = "weft_submitter_history";

/// Errors from repository operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("duplicate transaction")]
    DuplicateTx,
    #[error("double spending transaction")]
    DoubleSpend,
}

/// The structural record of a transaction inside a shard DAG.
///
/// Links are 64-byte content ids, never in-memory references; nodes are
/// value records fetched and stored per operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    /// Parent node id; zero on the genesis node.
    pub parent: TxHash,
    /// Child node ids, append-only.
    pub children: Vec<TxHash>,
    /// The transaction this node represents.
    pub tx_id: TxHash,
    /// Depth in the DAG; equals the transaction's anchor shard sequence.
    pub depth: u64,
}

/// One recorded (shard, transaction) binding of a submitter sequence slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardTxPair {
    pub shard_id: Vec<u8>,
    pub tx_id: TxHash,
}

/// Everything a submitter has bound to one sequence number.
///
/// The no-double-spend rule keeps shard ids unique within one history entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitterHistory {
    pub submitter: Vec<u8>,
    pub seq: u64,
    pub shard_tx_pairs: Vec<ShardTxPair>,
}

/// Capability contract of the ledger repository.
///
/// Implemented by [`LedgerDb`] in production and by counting/faulting
/// wrappers in tests.
pub trait DltDb: Send + Sync {
    /// Fetch a transaction by id.
    fn get_tx(&self, id: &TxHash) -> Result<Option<Transaction>, RepoError>;
    /// Record a new transaction. Fails with [`RepoError::DuplicateTx`] if the
    /// id is already present; never updates in place.
    fn add_tx(&self, tx: &Transaction) -> Result<(), RepoError>;
    /// Remove a transaction from the transaction table.
    ///
    /// The caller must guarantee the transaction is a tip of its shard DAG.
    /// Deleting a non-tip transaction leaves dangling child links and is
    /// unsupported; the repository does not guard against it.
    fn delete_tx(&self, id: &TxHash) -> Result<(), RepoError>;
    /// Attach `tx` to its shard DAG and recompute the shard's tip set.
    fn update_shard(&self, tx: &Transaction) -> Result<(), RepoError>;
    /// Delete a shard's DAG structure (not its transactions) and tips.
    fn flush_shard(&self, shard_id: &[u8]) -> Result<(), RepoError>;
    /// Record `tx` in its submitter's history. Re-recording the same
    /// transaction succeeds idempotently; a different transaction on an
    /// occupied (submitter, seq, shard) slot is a double-spend.
    fn update_submitter(&self, tx: &Transaction) -> Result<(), RepoError>;
    /// Like [`DltDb::update_submitter`] but overwrites an existing pair for
    /// the same shard; used when reconciling after conflict resolution.
    fn replace_submitter(&self, tx: &Transaction) -> Result<(), RepoError>;
    /// Fetch the DAG node recorded for a transaction id.
    fn get_shard_dag_node(&self, id: &TxHash) -> Result<Option<DagNode>, RepoError>;
    /// Fetch a submitter's history entry for one sequence number.
    fn get_submitter_history(
        &self,
        submitter: &[u8],
        seq: u64,
    ) -> Result<Option<SubmitterHistory>, RepoError>;
    /// Current tip ids of a shard, in stored order. Empty means the shard is
    /// unknown.
    fn shard_tips(&self, shard_id: &[u8]) -> Result<Vec<TxHash>, RepoError>;
}

/// Production repository over a storage provider.
pub struct LedgerDb {
    txs: Arc<dyn Database>,
    shard_dags: Arc<dyn Database>,
    shard_tips: Arc<dyn Database>,
    submitter_history: Arc<dyn Database>,
    lock: RwLock<()>,
}

impl LedgerDb {
    pub fn new(provider: &dyn DbProvider) -> Result<Self, RepoError> {
        Ok(LedgerDb {
            txs: provider.db(TX_DB)?,
            shard_dags: provider.db(SHARD_DAG_DB)?,
            shard_tips: provider.db(SHARD_TIPS_DB)?,
            submitter_history: provider.db(SUBMITTER_HISTORY_DB)?,
            lock: RwLock::new(()),
        })
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Internal readers; callers hold the lock.

    fn dag_node_nolock(&self, id: &TxHash) -> Result<Option<DagNode>, RepoError> {
        match self.shard_dags.get(id.as_bytes())? {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    fn save_dag_node_nolock(&self, node: &DagNode) -> Result<(), RepoError> {
        self.shard_dags.put(node.tx_id.as_bytes(), &encode(node)?)?;
        Ok(())
    }

    fn tips_nolock(&self, shard_id: &[u8]) -> Result<Vec<TxHash>, RepoError> {
        match self.shard_tips.get(shard_id)? {
            Some(data) => Ok(decode(&data)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_tips_nolock(&self, shard_id: &[u8], tips: &[TxHash]) -> Result<(), RepoError> {
        self.shard_tips.put(shard_id, &encode(&tips.to_vec())?)?;
        Ok(())
    }

    fn history_nolock(
        &self,
        submitter: &[u8],
        seq: u64,
    ) -> Result<Option<SubmitterHistory>, RepoError> {
        match self.submitter_history.get(&submitter_history_key(submitter, seq))? {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    fn save_history_nolock(&self, history: &SubmitterHistory) -> Result<(), RepoError> {
        let key = submitter_history_key(&history.submitter, history.seq);
        self.submitter_history.put(&key, &encode(history)?)?;
        Ok(())
    }

    /// History entry for `tx`'s (submitter, seq), or a fresh empty one.
    fn history_for_nolock(&self, tx: &Transaction) -> Result<SubmitterHistory, RepoError> {
        Ok(self
            .history_nolock(&tx.request.submitter_id, tx.request.submitter_seq)?
            .unwrap_or_else(|| SubmitterHistory {
                submitter: tx.request.submitter_id.clone(),
                seq: tx.request.submitter_seq,
                shard_tx_pairs: Vec::with_capacity(1),
            }))
    }
}

impl DltDb for LedgerDb {
    fn get_tx(&self, id: &TxHash) -> Result<Option<Transaction>, RepoError> {
        let _guard = self.read_guard();
        match self.txs.get(id.as_bytes())? {
            Some(data) => Ok(Some(
                Transaction::deserialize(&data)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn add_tx(&self, tx: &Transaction) -> Result<(), RepoError> {
        let data = tx
            .serialize()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let id = tx.id();

        let _guard = self.write_guard();
        if self.txs.has(id.as_bytes())? {
            return Err(RepoError::DuplicateTx);
        }
        self.txs.put(id.as_bytes(), &data)?;
        Ok(())
    }

    fn delete_tx(&self, id: &TxHash) -> Result<(), RepoError> {
        let _guard = self.write_guard();
        self.txs.delete(id.as_bytes())?;
        Ok(())
    }

    fn update_shard(&self, tx: &Transaction) -> Result<(), RepoError> {
        let _guard = self.write_guard();

        // structure record for the new transaction
        let node = DagNode {
            parent: tx.anchor.shard_parent,
            children: Vec::new(),
            tx_id: tx.id(),
            depth: tx.anchor.shard_seq,
        };
        self.save_dag_node_nolock(&node)?;

        // append to the parent's children (absent for genesis)
        if let Some(mut parent) = self.dag_node_nolock(&tx.anchor.shard_parent)? {
            parent.children.push(tx.id());
            self.save_dag_node_nolock(&parent)?;
        }

        // new tips = (old tips \ ({parent} ∪ uncles)) ∪ {tx}
        let tips = self.tips_nolock(&tx.anchor.shard_id)?;
        let mut new_tips = Vec::with_capacity(tips.len() + 1);
        for tip in tips {
            if tip != tx.anchor.shard_parent && !tx.anchor.shard_uncles.contains(&tip) {
                new_tips.push(tip);
            }
        }
        new_tips.push(tx.id());
        self.save_tips_nolock(&tx.anchor.shard_id, &new_tips)?;

        Ok(())
    }

    fn flush_shard(&self, shard_id: &[u8]) -> Result<(), RepoError> {
        let _guard = self.write_guard();

        // seed the work list with the tip nodes, then walk parent links
        // upward, deleting structure as we go
        let mut work = VecDeque::new();
        for tip in self.tips_nolock(shard_id)? {
            if let Some(node) = self.dag_node_nolock(&tip)? {
                work.push_back(node);
            }
        }
        self.shard_tips.delete(shard_id)?;

        let mut removed = 0usize;
        while let Some(node) = work.pop_front() {
            if let Some(parent) = self.dag_node_nolock(&node.parent)? {
                work.push_back(parent);
            }
            self.shard_dags.delete(node.tx_id.as_bytes())?;
            removed += 1;
        }
        tracing::info!(
            shard = %hex::encode(shard_id),
            nodes = removed,
            "Flushed shard DAG"
        );
        Ok(())
    }

    fn update_submitter(&self, tx: &Transaction) -> Result<(), RepoError> {
        let _guard = self.write_guard();

        let mut history = self.history_for_nolock(tx)?;
        let new_pair = ShardTxPair {
            shard_id: tx.request.shard_id.clone(),
            tx_id: tx.id(),
        };
        for existing in &history.shard_tx_pairs {
            if existing.shard_id == new_pair.shard_id {
                // same transaction re-recorded: fine; anything else is an
                // attempt to bind a second tx to this (seq, shard) slot
                if existing.tx_id == new_pair.tx_id {
                    return Ok(());
                }
                tracing::warn!(
                    submitter = %hex::encode(&tx.request.submitter_id),
                    seq = tx.request.submitter_seq,
                    "Double spend attempt rejected"
                );
                return Err(RepoError::DoubleSpend);
            }
        }
        history.shard_tx_pairs.push(new_pair);
        self.save_history_nolock(&history)
    }

    fn replace_submitter(&self, tx: &Transaction) -> Result<(), RepoError> {
        let _guard = self.write_guard();

        let mut history = self.history_for_nolock(tx)?;
        let new_pair = ShardTxPair {
            shard_id: tx.request.shard_id.clone(),
            tx_id: tx.id(),
        };
        match history
            .shard_tx_pairs
            .iter_mut()
            .find(|pair| pair.shard_id == new_pair.shard_id)
        {
            Some(existing) => *existing = new_pair,
            None => history.shard_tx_pairs.push(new_pair),
        }
        self.save_history_nolock(&history)
    }

    fn get_shard_dag_node(&self, id: &TxHash) -> Result<Option<DagNode>, RepoError> {
        let _guard = self.read_guard();
        self.dag_node_nolock(id)
    }

    fn get_submitter_history(
        &self,
        submitter: &[u8],
        seq: u64,
    ) -> Result<Option<SubmitterHistory>, RepoError> {
        let _guard = self.read_guard();
        self.history_nolock(submitter, seq)
    }

    fn shard_tips(&self, shard_id: &[u8]) -> Result<Vec<TxHash>, RepoError> {
        let _guard = self.read_guard();
        self.tips_nolock(shard_id)
    }
}

/// History key: submitter id ‖ `:` ‖ 8-byte big-endian sequence.
fn submitter_history_key(submitter: &[u8], seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(submitter.len() + 9);
    key.extend_from_slice(submitter);
    key.push(HISTORY_KEY_SEPARATOR);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RepoError> {
    bincode::serialize(value)
        .map_err(|e| StorageError::Serialization(e.to_string()).into())
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, RepoError> {
    bincode::deserialize(data)
        .map_err(|e| StorageError::Serialization(e.to_string()).into())
}
