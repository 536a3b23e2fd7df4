//! Seams between the chain logic and the outside world.
//!
//! - `AppendStore` — insert-only durable persistence, the sole owner of each
//!   partition's tail
//! - `Clock`       — the source of commit timestamps
//!
//! The chain writer is the only component that calls `AppendStore::commit`.
//! Readers (verifier, query) only ever see `read_tail` and `read_range`.

use chrono::{DateTime, Utc};

use chainlog_contracts::{
    entry::{AuditEntry, ChainTail},
    error::ChainResult,
};

/// A lazy, finite stream of entries in storage order.
pub type EntryStream = Box<dyn Iterator<Item = ChainResult<AuditEntry>> + Send>;

/// Insert-only persistence for audit entries.
///
/// Implementations must never expose a partially written entry to readers
/// and must never offer a way to update or remove one.
pub trait AppendStore: Send + Sync {
    /// Return the partition's extension cursor, or `ChainTail::GENESIS` if the
    /// partition has no entries yet.
    fn read_tail(&self, partition_key: &str) -> ChainResult<ChainTail>;

    /// Durably persist one entry, atomically.
    ///
    /// Either the whole entry is stored or nothing is. Fails with
    /// `StorageUnavailable` on transient I/O trouble, or with
    /// `IntegrityViolation` if `entry` does not extend the current tail
    /// (duplicate or skipped sequence, or mismatched `previous_hash`).
    fn commit(&self, entry: &AuditEntry) -> ChainResult<()>;

    /// Stream the records stored at positions `[from, to]`, 1-based, in the
    /// order they are stored. Re-reading the same range yields the same
    /// records.
    ///
    /// Selection is by storage position, never by the stored `sequence`
    /// field, which may have been altered. In an untampered partition the
    /// two coincide. A record that can no longer be decoded is yielded as
    /// `IntegrityViolation` in its position and ends the stream.
    fn read_range(&self, partition_key: &str, from: u64, to: u64) -> ChainResult<EntryStream>;

    /// Find a committed entry carrying `key` as its idempotency key.
    fn find_by_idempotency_key(
        &self,
        partition_key: &str,
        key: &str,
    ) -> ChainResult<Option<AuditEntry>>;

    /// Every partition that has at least one entry, sorted.
    fn partitions(&self) -> ChainResult<Vec<String>>;
}

/// A source of commit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
