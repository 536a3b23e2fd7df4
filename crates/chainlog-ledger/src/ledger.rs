//! The `AuditLedger` facade.
//!
//! Business code records events and reads them back; operators verify,
//! checkpoint, and inspect tails. The underlying store is never handed out,
//! and there is no entry point that updates or deletes an entry.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use chainlog_contracts::{
    entry::{Action, AuditEntry, AuditEvent, ChainTail, Checkpoint, EntityRef, EntryId},
    error::{ChainError, ChainResult},
    query::QueryFilter,
    report::VerificationReport,
    state::StateValue,
};
use chainlog_core::{
    traits::{AppendStore, Clock, EntryStream},
    ChainWriter,
};
use chainlog_store::InMemoryAppendStore;
use chainlog_verify::{ChainVerifier, VerifyOptions};

use crate::config::LedgerConfig;

/// Append-only, hash-chained audit ledger.
pub struct AuditLedger {
    store: Arc<dyn AppendStore>,
    writer: ChainWriter,
    verifier: ChainVerifier,
}

impl AuditLedger {
    /// Build a ledger over `store` with default timeouts.
    pub fn new(store: Arc<dyn AppendStore>) -> Self {
        Self {
            writer: ChainWriter::new(store.clone()),
            verifier: ChainVerifier::new(store.clone()),
            store,
        }
    }

    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAppendStore::new()))
    }

    /// Open the configured store and apply the configured timeouts.
    pub fn from_config(config: &LedgerConfig) -> ChainResult<Self> {
        let store = config.open_store()?;
        info!(
            kind = ?config.store.kind,
            lock_timeout_ms = config.writer.lock_timeout_ms,
            "audit ledger opened"
        );
        Ok(Self {
            writer: ChainWriter::new(store.clone()).with_lock_timeout(config.lock_timeout()),
            verifier: ChainVerifier::new(store.clone())
                .with_default_deadline(config.verify_deadline()),
            store,
        })
    }

    /// Replace the writer's timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.writer = self.writer.with_clock(clock);
        self
    }

    // ── Business surface ──────────────────────────────────────────────────────

    /// Record one mutation and return the new entry's id.
    pub fn record(
        &self,
        partition_key: &str,
        action: Action,
        entity_ref: EntityRef,
        actor_id: impl Into<String>,
        before_state: Option<StateValue>,
        after_state: Option<StateValue>,
    ) -> ChainResult<EntryId> {
        let event = AuditEvent {
            action,
            entity_ref,
            actor_id: actor_id.into(),
            before_state,
            after_state,
            idempotency_key: None,
        };
        Ok(self.record_event(partition_key, event)?.entry_id)
    }

    /// Record `event` and return the committed entry, hashes included.
    pub fn record_event(&self, partition_key: &str, event: AuditEvent) -> ChainResult<AuditEntry> {
        self.writer.append(partition_key, event)
    }

    /// Stream the entries of `partition_key` that satisfy `filter`.
    ///
    /// The iterator reads lazily from the store and stops after the first
    /// error it yields.
    pub fn query(&self, partition_key: &str, filter: QueryFilter) -> ChainResult<EntryQuery> {
        let from = filter.from_sequence.unwrap_or(1).max(1);
        let to = filter.to_sequence.unwrap_or(u64::MAX);
        if from > to {
            return Err(ChainError::InvalidRange { from, to });
        }
        debug!(partition_key = %partition_key, from, to, "query");
        Ok(EntryQuery {
            inner: self.store.read_range(partition_key, from, to)?,
            remaining: filter.limit,
            filter,
            done: false,
        })
    }

    // ── Operator surface ──────────────────────────────────────────────────────

    /// Verify `range` of `partition_key`. A broken chain is reported, not
    /// returned as an error; use `VerificationReport::ensure_valid` for that.
    pub fn verify(
        &self,
        partition_key: &str,
        range: RangeInclusive<u64>,
    ) -> ChainResult<VerificationReport> {
        self.verifier.verify(partition_key, *range.start(), *range.end())
    }

    pub fn verify_with(
        &self,
        partition_key: &str,
        range: RangeInclusive<u64>,
        options: &VerifyOptions,
    ) -> ChainResult<VerificationReport> {
        self.verifier
            .verify_with(partition_key, *range.start(), *range.end(), options)
    }

    /// Verify every record stored for the partition.
    pub fn verify_all(&self, partition_key: &str) -> ChainResult<VerificationReport> {
        self.verify(partition_key, 1..=u64::MAX)
    }

    /// Capture the current tail of `partition_key`.
    pub fn checkpoint(&self, partition_key: &str) -> ChainResult<Checkpoint> {
        let tail = self.tail(partition_key)?;
        let checkpoint = Checkpoint {
            partition_key: partition_key.to_string(),
            sequence: tail.sequence,
            hash: tail.hash,
            timestamp: tail.timestamp,
            taken_at: Utc::now(),
        };
        info!(
            partition_key = %partition_key,
            sequence = checkpoint.sequence,
            hash = %checkpoint.hash,
            "checkpoint taken"
        );
        Ok(checkpoint)
    }

    /// Verify the entries after `checkpoint`, up to `to`.
    pub fn verify_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        to: u64,
    ) -> ChainResult<VerificationReport> {
        self.verifier
            .verify_from_checkpoint(checkpoint, to, &VerifyOptions::default())
    }

    /// True if the store still holds the checkpointed entry unchanged.
    pub fn confirm_checkpoint(&self, checkpoint: &Checkpoint) -> ChainResult<bool> {
        self.verifier.confirm_checkpoint(checkpoint)
    }

    pub fn tail(&self, partition_key: &str) -> ChainResult<ChainTail> {
        self.store.read_tail(partition_key)
    }

    /// Partition keys with at least one entry, sorted.
    pub fn partitions(&self) -> ChainResult<Vec<String>> {
        self.store.partitions()
    }
}

/// Lazy iterator returned by `AuditLedger::query`.
pub struct EntryQuery {
    inner: EntryStream,
    filter: QueryFilter,
    remaining: Option<usize>,
    done: bool,
}

impl Iterator for EntryQuery {
    type Item = ChainResult<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        for item in self.inner.by_ref() {
            match item {
                Ok(entry) if self.filter.matches(&entry) => {
                    if let Some(n) = self.remaining.as_mut() {
                        *n -= 1;
                    }
                    return Some(Ok(entry));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.done = true;
        None
    }
}
