//! Ledger wire and persistence entities.
//!
//! A [`Transaction`] pairs the submitter's [`TxRequest`] with the [`Anchor`]
//! issued by the stack. Both halves are immutable once the transaction id is
//! derived: the id is SHA-512 over the raw concatenation of the request
//! signature and the anchor signature, so mutating either half produces a
//! different transaction.

use serde::{Deserialize, Serialize};

use crate::{sha512, sha512_tagged, TxHash};

/// A submitter's request to record a transaction on a shard.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    /// Submitter identity (public key bytes).
    pub submitter_id: Vec<u8>,
    /// Position in the submitter's linear sequence chain, starting at 1.
    pub submitter_seq: u64,
    /// Shard this transaction belongs to.
    pub shard_id: Vec<u8>,
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// Submitter signature over [`TxRequest::signing_digest`].
    pub signature: Vec<u8>,
    /// Id of the submitter's previous transaction (zero for the first).
    pub last_tx: TxHash,
}

impl TxRequest {
    /// Digest the submitter signs: payload, submitter, shard, sequence and
    /// the previous transaction id, length-prefixed against splicing.
    pub fn signing_digest(&self) -> TxHash {
        sha512_tagged(&[
            &self.payload,
            &self.submitter_id,
            &self.shard_id,
            &self.submitter_seq.to_be_bytes(),
            self.last_tx.as_bytes(),
        ])
    }
}

/// The binding issued by the stack that attaches a new transaction to the
/// shard DAG and the submitter chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Shard this anchor extends.
    pub shard_id: Vec<u8>,
    /// Chosen parent transaction in the shard DAG.
    pub shard_parent: TxHash,
    /// Depth of the new transaction: parent depth + 1.
    pub shard_seq: u64,
    /// Sum of all tip depths at anchor time, plus one.
    pub weight: u64,
    /// Tips that lost parent selection, in demotion order.
    pub shard_uncles: Vec<TxHash>,
    /// Submitter identity the anchor was issued to.
    pub submitter_id: Vec<u8>,
    /// Submitter sequence the anchor occupies.
    pub submitter_seq: u64,
    /// The submitter's previous transaction id.
    pub submitter_last_tx: TxHash,
    /// Identity of the node that issued the anchor.
    pub node_id: Vec<u8>,
    /// Node signature over [`Anchor::signing_digest`].
    pub signature: Vec<u8>,
}

impl Anchor {
    /// Digest the issuing node signs: every anchor field except the
    /// signature itself.
    pub fn signing_digest(&self) -> TxHash {
        let mut parts: Vec<&[u8]> = vec![
            &self.shard_id,
            self.shard_parent.as_bytes(),
        ];
        let shard_seq = self.shard_seq.to_be_bytes();
        let weight = self.weight.to_be_bytes();
        let submitter_seq = self.submitter_seq.to_be_bytes();
        parts.push(&shard_seq);
        parts.push(&weight);
        for uncle in &self.shard_uncles {
            parts.push(uncle.as_bytes());
        }
        parts.push(&self.submitter_id);
        parts.push(&submitter_seq);
        parts.push(self.submitter_last_tx.as_bytes());
        parts.push(&self.node_id);
        sha512_tagged(&parts)
    }
}

/// A transaction recorded (or to be recorded) on the ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub request: TxRequest,
    pub anchor: Anchor,
}

impl Transaction {
    pub fn new(request: TxRequest, anchor: Anchor) -> Self {
        Transaction { request, anchor }
    }

    /// The transaction's content id: SHA-512 of the request signature
    /// concatenated with the anchor signature. Deterministic for a given
    /// transaction since both halves are immutable after creation.
    pub fn id(&self) -> TxHash {
        sha512(&[&self.request.signature, &self.anchor.signature])
    }

    /// The synthetic genesis transaction of a shard.
    ///
    /// Its request signature is the shard id itself and its anchor carries
    /// no signature, so the genesis id reduces to SHA-512 of the shard id —
    /// every node derives the same genesis without coordination.
    pub fn genesis(shard_id: &[u8]) -> Self {
        Transaction {
            request: TxRequest {
                shard_id: shard_id.to_vec(),
                signature: shard_id.to_vec(),
                ..TxRequest::default()
            },
            anchor: Anchor {
                shard_id: shard_id.to_vec(),
                ..Anchor::default()
            },
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
