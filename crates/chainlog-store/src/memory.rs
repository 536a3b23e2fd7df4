//! In-memory implementation of `AppendStore`.
//!
//! `InMemoryAppendStore` keeps every partition's entries in a `Vec` behind a
//! `RwLock`. Readers take snapshots, so a verifier never blocks the writer
//! for longer than one clone of the requested range.
//!
//! Nothing survives the process. Use `FileAppendStore` for durability.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use chainlog_contracts::{
    entry::{AuditEntry, ChainTail},
    error::{ChainError, ChainResult},
};
use chainlog_core::traits::{AppendStore, EntryStream};

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Default)]
struct PartitionState {
    /// Entries in commit order.
    entries: Vec<AuditEntry>,
    /// Idempotency key → position in `entries`.
    idempotency: HashMap<String, usize>,
}

impl PartitionState {
    fn tail(&self) -> ChainTail {
        self.entries
            .last()
            .map(ChainTail::of)
            .unwrap_or(ChainTail::GENESIS)
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

/// An append-only store held entirely in memory.
#[derive(Default)]
pub struct InMemoryAppendStore {
    partitions: RwLock<HashMap<String, PartitionState>>,
}

impl InMemoryAppendStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all partitions.
    pub fn len(&self) -> usize {
        self.partitions.read().values().map(|p| p.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Edit stored entries in place, bypassing every check.
    ///
    /// Simulates an out-of-band attack on the storage medium so tests can
    /// confirm that verification catches it. Only compiled for tests.
    #[cfg(any(test, feature = "testing"))]
    pub fn tamper<F>(&self, partition_key: &str, f: F)
    where
        F: FnOnce(&mut Vec<AuditEntry>),
    {
        if let Some(state) = self.partitions.write().get_mut(partition_key) {
            f(&mut state.entries);
        }
    }
}

/// Check that `entry` extends `tail` exactly.
pub(crate) fn check_extends(tail: &ChainTail, entry: &AuditEntry) -> ChainResult<()> {
    if entry.sequence <= tail.sequence {
        return Err(ChainError::IntegrityViolation {
            partition_key: entry.partition_key.clone(),
            reason: format!("sequence {} is already committed", entry.sequence),
        });
    }
    if entry.sequence != tail.sequence + 1 {
        return Err(ChainError::IntegrityViolation {
            partition_key: entry.partition_key.clone(),
            reason: format!(
                "sequence {} would leave a gap after {}",
                entry.sequence, tail.sequence
            ),
        });
    }
    if entry.previous_hash != tail.hash {
        return Err(ChainError::IntegrityViolation {
            partition_key: entry.partition_key.clone(),
            reason: format!(
                "previous_hash {} does not match tail hash {}",
                entry.previous_hash, tail.hash
            ),
        });
    }
    Ok(())
}

/// The slice of `entries` at 1-based positions `[from, to]`.
fn positions(entries: &[AuditEntry], from: u64, to: u64) -> &[AuditEntry] {
    let start = usize::try_from(from.max(1) - 1).unwrap_or(usize::MAX);
    let end = usize::try_from(to).unwrap_or(usize::MAX).min(entries.len());
    if start >= end {
        return &[];
    }
    &entries[start..end]
}

// ── AppendStore impl ──────────────────────────────────────────────────────────

impl AppendStore for InMemoryAppendStore {
    fn read_tail(&self, partition_key: &str) -> ChainResult<ChainTail> {
        Ok(self
            .partitions
            .read()
            .get(partition_key)
            .map(PartitionState::tail)
            .unwrap_or(ChainTail::GENESIS))
    }

    /// Push one entry after confirming it extends the tail. The push happens
    /// under the write lock, so readers see all of it or none of it.
    fn commit(&self, entry: &AuditEntry) -> ChainResult<()> {
        let mut partitions = self.partitions.write();
        let state = partitions.entry(entry.partition_key.clone()).or_default();

        check_extends(&state.tail(), entry)?;

        if let Some(key) = &entry.idempotency_key {
            state.idempotency.insert(key.clone(), state.entries.len());
        }
        state.entries.push(entry.clone());

        debug!(
            partition_key = %entry.partition_key,
            sequence = entry.sequence,
            "entry stored in memory"
        );
        Ok(())
    }

    fn read_range(&self, partition_key: &str, from: u64, to: u64) -> ChainResult<EntryStream> {
        let snapshot: Vec<ChainResult<AuditEntry>> = self
            .partitions
            .read()
            .get(partition_key)
            .map(|state| {
                positions(&state.entries, from, to)
                    .iter()
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn find_by_idempotency_key(
        &self,
        partition_key: &str,
        key: &str,
    ) -> ChainResult<Option<AuditEntry>> {
        let partitions = self.partitions.read();
        Ok(partitions.get(partition_key).and_then(|state| {
            state
                .idempotency
                .get(key)
                .and_then(|&idx| state.entries.get(idx))
                .cloned()
        }))
    }

    fn partitions(&self) -> ChainResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .partitions
            .read()
            .iter()
            .filter(|(_, state)| !state.entries.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
