//! Endorsement layer: submitter-side validation of anchors and
//! transactions.
//!
//! The endorser enforces the linear per-submitter sequence chain: every
//! anchor must extend the submitter's previous transaction, every sequence
//! slot can be bound to a shard exactly once, and inbound transactions are
//! recorded into submitter history before they reach the shard layer.

use std::sync::Arc;

use crate::constants::FIRST_SUBMITTER_SEQ;
use crate::dto::{Anchor, Transaction};
use crate::repo::{DltDb, RepoError};

/// Errors from endorsement operations.
#[derive(Debug, thiserror::Error)]
pub enum EndorseError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("duplicate transaction")]
    DuplicateTx,
    #[error("transaction has no submitter id")]
    MissingSubmitter,
    #[error("submitter sequence must start at 1")]
    InvalidSequence,
    #[error("anchor parent does not match submitter history")]
    InvalidParent,
    #[error("submitter sequence already occupied")]
    SequenceTaken,
}

/// The endorsement layer over a shared ledger repository.
pub struct Endorser {
    db: Arc<dyn DltDb>,
}

impl Endorser {
    pub fn new(db: Arc<dyn DltDb>) -> Self {
        Endorser { db }
    }

    /// Validate and record an inbound network transaction: write the raw
    /// transaction and bind it into the submitter's history. A conflicting
    /// binding surfaces as [`RepoError::DoubleSpend`].
    pub fn handle(&self, tx: &Transaction) -> Result<(), EndorseError> {
        if tx.request.submitter_id.is_empty() {
            return Err(EndorseError::MissingSubmitter);
        }
        if self.db.get_tx(&tx.id())?.is_some() {
            return Err(EndorseError::DuplicateTx);
        }
        self.db.add_tx(tx)?;
        self.db.update_submitter(tx)?;
        Ok(())
    }

    /// Record a locally submitted transaction into submitter history. The
    /// raw transaction itself is written by the shard layer during
    /// approval.
    pub fn approve(&self, tx: &Transaction) -> Result<(), EndorseError> {
        self.db.update_submitter(tx)?;
        Ok(())
    }

    /// Validate the submitter linkage of an outgoing anchor.
    ///
    /// The anchor's sequence slot must be vacant, and for every sequence
    /// after the first the slot below must hold the transaction the anchor
    /// names as the submitter's last. Sequence 1 skips the parent lookup.
    pub fn anchor(&self, a: &Anchor) -> Result<(), EndorseError> {
        if a.submitter_seq < FIRST_SUBMITTER_SEQ {
            return Err(EndorseError::InvalidSequence);
        }

        if a.submitter_seq > FIRST_SUBMITTER_SEQ {
            let parent_history = self
                .db
                .get_submitter_history(&a.submitter_id, a.submitter_seq - 1)?
                .ok_or(EndorseError::InvalidParent)?;
            let linked = parent_history
                .shard_tx_pairs
                .iter()
                .any(|pair| pair.tx_id == a.submitter_last_tx);
            if !linked {
                return Err(EndorseError::InvalidParent);
            }
        }

        if self
            .db
            .get_submitter_history(&a.submitter_id, a.submitter_seq)?
            .is_some()
        {
            tracing::debug!(
                submitter = %hex::encode(&a.submitter_id),
                seq = a.submitter_seq,
                "Anchor request for occupied sequence slot"
            );
            return Err(EndorseError::SequenceTaken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::TxRequest;
    use crate::repo::{LedgerDb, SubmitterHistory};
    use crate::sha512;
    use crate::storage::SledProvider;
    use crate::TxHash;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_db() -> Arc<dyn DltDb> {
        let provider = SledProvider::open_temporary().unwrap();
        Arc::new(LedgerDb::new(&provider).unwrap())
    }

    fn tx_at(submitter: &[u8], seq: u64, last_tx: TxHash, tag: &str) -> Transaction {
        Transaction {
            request: TxRequest {
                submitter_id: submitter.to_vec(),
                submitter_seq: seq,
                shard_id: b"shard".to_vec(),
                payload: format!("payload {tag}").into_bytes(),
                signature: format!("request sig {tag}").into_bytes(),
                last_tx,
            },
            anchor: Anchor {
                shard_id: b"shard".to_vec(),
                submitter_id: submitter.to_vec(),
                submitter_seq: seq,
                submitter_last_tx: last_tx,
                signature: format!("anchor sig {tag}").into_bytes(),
                ..Anchor::default()
            },
        }
    }

    #[test]
    fn handle_records_tx_and_history() {
        let db = temp_db();
        let endorser = Endorser::new(db.clone());
        let tx = tx_at(b"alice", 1, TxHash::zero(), "a");

        endorser.handle(&tx).unwrap();
        assert!(db.get_tx(&tx.id()).unwrap().is_some());
        let history = db.get_submitter_history(b"alice", 1).unwrap().unwrap();
        assert_eq!(history.shard_tx_pairs[0].tx_id, tx.id());
    }

    #[test]
    fn handle_rejects_duplicate_and_anonymous() {
        let endorser = Endorser::new(temp_db());
        let tx = tx_at(b"alice", 1, TxHash::zero(), "a");

        endorser.handle(&tx).unwrap();
        assert!(matches!(
            endorser.handle(&tx),
            Err(EndorseError::DuplicateTx)
        ));

        let anonymous = tx_at(b"", 1, TxHash::zero(), "b");
        assert!(matches!(
            endorser.handle(&anonymous),
            Err(EndorseError::MissingSubmitter)
        ));
    }

    #[test]
    fn handle_propagates_double_spend() {
        let endorser = Endorser::new(temp_db());
        let first = tx_at(b"alice", 1, TxHash::zero(), "first");
        let second = tx_at(b"alice", 1, TxHash::zero(), "second");

        endorser.handle(&first).unwrap();
        assert!(matches!(
            endorser.handle(&second),
            Err(EndorseError::Repo(RepoError::DoubleSpend))
        ));
    }

    /// Approval must not write the raw transaction; the shard layer does
    /// that. Verified with a counting repository wrapper.
    #[test]
    fn approve_updates_history_without_writing_tx() {
        struct CountingDb {
            inner: Arc<dyn DltDb>,
            add_tx_calls: AtomicUsize,
            update_submitter_calls: AtomicUsize,
        }

        impl DltDb for CountingDb {
            fn get_tx(&self, id: &TxHash) -> Result<Option<Transaction>, RepoError> {
                self.inner.get_tx(id)
            }
            fn add_tx(&self, tx: &Transaction) -> Result<(), RepoError> {
                self.add_tx_calls.fetch_add(1, Ordering::SeqCst);
                self.inner.add_tx(tx)
            }
            fn delete_tx(&self, id: &TxHash) -> Result<(), RepoError> {
                self.inner.delete_tx(id)
            }
            fn update_shard(&self, tx: &Transaction) -> Result<(), RepoError> {
                self.inner.update_shard(tx)
            }
            fn flush_shard(&self, shard_id: &[u8]) -> Result<(), RepoError> {
                self.inner.flush_shard(shard_id)
            }
            fn update_submitter(&self, tx: &Transaction) -> Result<(), RepoError> {
                self.update_submitter_calls.fetch_add(1, Ordering::SeqCst);
                self.inner.update_submitter(tx)
            }
            fn replace_submitter(&self, tx: &Transaction) -> Result<(), RepoError> {
                self.inner.replace_submitter(tx)
            }
            fn get_shard_dag_node(
                &self,
                id: &TxHash,
            ) -> Result<Option<crate::repo::DagNode>, RepoError> {
                self.inner.get_shard_dag_node(id)
            }
            fn get_submitter_history(
                &self,
                submitter: &[u8],
                seq: u64,
            ) -> Result<Option<SubmitterHistory>, RepoError> {
                self.inner.get_submitter_history(submitter, seq)
            }
            fn shard_tips(&self, shard_id: &[u8]) -> Result<Vec<TxHash>, RepoError> {
                self.inner.shard_tips(shard_id)
            }
        }

        let counting = Arc::new(CountingDb {
            inner: temp_db(),
            add_tx_calls: AtomicUsize::new(0),
            update_submitter_calls: AtomicUsize::new(0),
        });
        let endorser = Endorser::new(counting.clone());

        endorser
            .approve(&tx_at(b"alice", 1, TxHash::zero(), "a"))
            .unwrap();
        assert_eq!(counting.add_tx_calls.load(Ordering::SeqCst), 0);
        assert_eq!(counting.update_submitter_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn anchor_accepts_valid_successor() {
        let db = temp_db();
        let endorser = Endorser::new(db.clone());
        let parent = tx_at(b"alice", 1, TxHash::zero(), "parent");
        db.update_submitter(&parent).unwrap();

        let a = Anchor {
            submitter_id: b"alice".to_vec(),
            submitter_seq: 2,
            submitter_last_tx: parent.id(),
            ..Anchor::default()
        };
        endorser.anchor(&a).unwrap();
    }

    #[test]
    fn anchor_accepts_first_sequence_without_parent() {
        let endorser = Endorser::new(temp_db());
        let a = Anchor {
            submitter_id: b"newcomer".to_vec(),
            submitter_seq: 1,
            ..Anchor::default()
        };
        endorser.anchor(&a).unwrap();
    }

    #[test]
    fn anchor_rejects_sequence_zero() {
        let endorser = Endorser::new(temp_db());
        let a = Anchor {
            submitter_id: b"alice".to_vec(),
            submitter_seq: 0,
            ..Anchor::default()
        };
        assert!(matches!(
            endorser.anchor(&a),
            Err(EndorseError::InvalidSequence)
        ));
    }

    #[test]
    fn anchor_rejects_unknown_parent() {
        let db = temp_db();
        let endorser = Endorser::new(db.clone());
        let parent = tx_at(b"alice", 1, TxHash::zero(), "parent");
        db.update_submitter(&parent).unwrap();

        // wrong last-tx hash
        let bad_hash = Anchor {
            submitter_id: b"alice".to_vec(),
            submitter_seq: 2,
            submitter_last_tx: sha512(&[b"someone else"]),
            ..Anchor::default()
        };
        assert!(matches!(
            endorser.anchor(&bad_hash),
            Err(EndorseError::InvalidParent)
        ));

        // sequence far beyond recorded history
        let gap = Anchor {
            submitter_id: b"alice".to_vec(),
            submitter_seq: 21,
            submitter_last_tx: parent.id(),
            ..Anchor::default()
        };
        assert!(matches!(
            endorser.anchor(&gap),
            Err(EndorseError::InvalidParent)
        ));
    }

    #[test]
    fn anchor_rejects_occupied_sequence() {
        let db = temp_db();
        let endorser = Endorser::new(db.clone());
        let parent = tx_at(b"alice", 1, TxHash::zero(), "parent");
        db.update_submitter(&parent).unwrap();
        let child = tx_at(b"alice", 2, parent.id(), "child");
        db.update_submitter(&child).unwrap();

        // slot 2 is taken; anchoring there again is a double-spend attempt
        let a = Anchor {
            submitter_id: b"alice".to_vec(),
            submitter_seq: 2,
            submitter_last_tx: parent.id(),
            ..Anchor::default()
        };
        assert!(matches!(
            endorser.anchor(&a),
            Err(EndorseError::SequenceTaken)
        ));
    }
}
