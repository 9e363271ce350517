//! Node identity and signing oracle.
//!
//! The ledger core treats cryptography as an oracle: 64-byte SHA-512 digests
//! for content ids (see [`crate::sha512`]) and Ed25519 for node and submitter
//! signatures. Signatures and public keys travel through the data model as
//! opaque byte vectors so the signature scheme can be swapped without
//! touching the repository or the DAG rules.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;

/// Errors from key loading and persistence.
#[derive(Clone, Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key I/O error: {0}")]
    Io(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// An Ed25519 keypair identifying a node (or, in tests, a submitter).
pub struct NodeKeypair {
    signing: SigningKey,
}

impl NodeKeypair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        NodeKeypair {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the keypair from `path`, generating and persisting a new one if
    /// the file does not exist yet.
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let raw: [u8; 64] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| KeyError::InvalidKey(format!("expected 64 bytes, got {}", bytes.len())))?;
                let signing = SigningKey::from_keypair_bytes(&raw)
                    .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
                Ok(NodeKeypair { signing })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keypair = Self::generate();
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| KeyError::Io(e.to_string()))?;
                }
                std::fs::write(path, keypair.signing.to_keypair_bytes())
                    .map_err(|e| KeyError::Io(e.to_string()))?;
                tracing::info!(
                    key = %hex::encode(&keypair.public_bytes()[..8]),
                    "Generated node key"
                );
                Ok(keypair)
            }
            Err(e) => Err(KeyError::Io(e.to_string())),
        }
    }

    /// Public key bytes; doubles as the node id on anchors.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.signing.verifying_key().to_bytes().to_vec()
    }

    /// Sign a message, returning the detached signature bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

/// Verify a detached signature against a public key.
///
/// Malformed keys or signatures verify as `false` rather than erroring; a
/// peer sending garbage is indistinguishable from one sending a bad
/// signature.
pub fn verify(public: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let key_bytes: [u8; 32] = match public.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let key = match VerifyingKey::from_bytes(&key_bytes) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig = match ed25519_dalek::Signature::from_slice(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    key.verify(message, &sig).is_ok()
}
