//! Hash-chain primitive.
//!
//! Hash input layout (bytes, in order):
//!   1. previous_hash, 32 raw bytes
//!   2. length of the encoded fields as u64 big-endian
//!   3. the canonical encoding from `encoder::encode`
//!
//! The fixed-width prefix and explicit length make the framing injective:
//! no two distinct `(previous_hash, encoded)` pairs feed SHA-256 the same
//! bytes.

use sha2::{Digest, Sha256};

use chainlog_contracts::{entry::AuditEntry, error::ChainResult, hash::ChainHash};

use crate::encoder::encode_entry;

/// Compute the chain hash for one entry.
pub fn compute_hash(previous_hash: &ChainHash, encoded_fields: &[u8]) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update((encoded_fields.len() as u64).to_be_bytes());
    hasher.update(encoded_fields);
    ChainHash(hasher.finalize().into())
}

/// Recompute a stored entry's `current_hash` from its other fields,
/// including its stored `previous_hash`.
pub fn hash_entry(entry: &AuditEntry) -> ChainResult<ChainHash> {
    let encoded = encode_entry(entry)?;
    Ok(compute_hash(&entry.previous_hash, &encoded))
}
