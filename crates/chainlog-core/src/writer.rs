//! The chain writer: the single path by which entries are created.
//!
//! Per append:
//!
//!   Validate → Lock(partition) → Idempotency check → Tail → Encode → Hash → Commit → Unlock
//!
//! The critical section is everything between taking and dropping the
//! partition lock. It is the only place a partition's linear order is
//! decided, and there is at most one append in flight per partition.
//! Different partitions never contend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use chainlog_contracts::{
    entry::{Action, AuditEntry, AuditEvent, EntryId},
    error::{ChainError, ChainResult},
    state::StateValue,
};

use crate::{
    encoder::{encode, EntryFields},
    hash::compute_hash,
    traits::{AppendStore, Clock, SystemClock},
};

/// Default upper bound on waiting for a partition's lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Serializes appends per partition and commits fully-hashed entries.
///
/// Share one writer (behind an `Arc`) between every caller that appends to
/// the same store; two writers over one store would each have their own lock
/// registry and the store would then reject the loser's commit with
/// `IntegrityViolation`.
pub struct ChainWriter {
    store: Arc<dyn AppendStore>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
}

impl ChainWriter {
    /// Create a writer over `store` using the system clock.
    pub fn new(store: Arc<dyn AppendStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound how long `append` waits for partition exclusivity.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Get or create the lock guarding `partition_key`.
    fn partition_lock(&self, partition_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(partition_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append `event` to `partition_key`'s chain and return the committed entry.
    ///
    /// Racing appends on one partition are ordered by lock acquisition, not by
    /// event time; each gets its own sequence and timestamp.
    ///
    /// If the event carries an idempotency key that is already committed in
    /// this partition, the existing entry is returned and nothing is written.
    ///
    /// # Errors
    ///
    /// - `EncodingError` — invalid partition key, action/state shape, or
    ///   snapshot content. Raised before the lock is taken.
    /// - `StorageUnavailable` — lock wait timed out or the store failed
    ///   transiently. Safe to retry with the same event.
    /// - `IntegrityViolation` — the store saw a sequence conflict. Not retried.
    pub fn append(&self, partition_key: &str, event: AuditEvent) -> ChainResult<AuditEntry> {
        validate_event(partition_key, &event)?;
        let event = normalize(event);

        let lock = self.partition_lock(partition_key);
        let result = self.append_exclusive(partition_key, event, &lock);
        self.release_partition_lock(partition_key, lock);
        result
    }

    /// Drop the registry's lock for `partition_key` once no caller holds or
    /// awaits it.
    ///
    /// Clones are only handed out under the registry lock, so a strong count
    /// of one seen under that lock means the registry is the last holder.
    fn release_partition_lock(&self, partition_key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks
            .get(partition_key)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(partition_key);
        }
    }

    #[cfg(test)]
    fn tracked_partitions(&self) -> usize {
        self.locks.lock().len()
    }

    fn append_exclusive(
        &self,
        partition_key: &str,
        event: AuditEvent,
        lock: &Mutex<()>,
    ) -> ChainResult<AuditEntry> {
        let _guard = lock.try_lock_for(self.lock_timeout).ok_or_else(|| {
            warn!(
                partition_key = %partition_key,
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "timed out waiting for partition lock"
            );
            ChainError::StorageUnavailable {
                reason: format!(
                    "timed out after {:?} waiting for partition '{}'",
                    self.lock_timeout, partition_key
                ),
            }
        })?;

        // ── Critical section ─────────────────────────────────────────────────

        if let Some(key) = event.idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_by_idempotency_key(partition_key, key)? {
                debug!(
                    partition_key = %partition_key,
                    idempotency_key = %key,
                    sequence = existing.sequence,
                    "idempotent re-submission; returning committed entry"
                );
                return Ok(existing);
            }
        }

        let tail = self.store.read_tail(partition_key)?;
        let sequence = tail.sequence + 1;
        let timestamp = commit_time(self.clock.now(), tail.timestamp);
        let entry_id = EntryId::new();

        let encoded = encode(&EntryFields {
            entry_id,
            partition_key,
            sequence,
            timestamp,
            actor_id: &event.actor_id,
            action: event.action,
            entity_ref: &event.entity_ref,
            before_state: event.before_state.as_ref(),
            after_state: event.after_state.as_ref(),
            idempotency_key: event.idempotency_key.as_deref(),
        })?;
        let current_hash = compute_hash(&tail.hash, &encoded);

        let entry = AuditEntry {
            entry_id,
            partition_key: partition_key.to_string(),
            sequence,
            timestamp,
            actor_id: event.actor_id,
            action: event.action,
            entity_ref: event.entity_ref,
            before_state: event.before_state,
            after_state: event.after_state,
            idempotency_key: event.idempotency_key,
            previous_hash: tail.hash,
            current_hash,
        };

        if let Err(e) = self.store.commit(&entry) {
            match &e {
                ChainError::IntegrityViolation { .. } => error!(
                    partition_key = %partition_key,
                    sequence,
                    error = %e,
                    "store rejected append; partition exclusivity was bypassed"
                ),
                _ => warn!(
                    partition_key = %partition_key,
                    sequence,
                    error = %e,
                    "append failed"
                ),
            }
            return Err(e);
        }

        info!(
            partition_key = %partition_key,
            sequence,
            entry_id = %entry.entry_id,
            action = %entry.action,
            entity = %entry.entity_ref,
            current_hash = %entry.current_hash,
            "audit entry committed"
        );

        Ok(entry)
    }
}

/// Reject events that can never be committed.
///
/// A create has no prior state and a delete has no resulting state; the
/// other actions may carry either.
pub fn validate_event(partition_key: &str, event: &AuditEvent) -> ChainResult<()> {
    if partition_key.is_empty() {
        return Err(ChainError::EncodingError {
            reason: "partition key must not be empty".to_string(),
        });
    }
    if event.actor_id.is_empty() {
        return Err(ChainError::EncodingError {
            reason: "actor id must not be empty".to_string(),
        });
    }
    let has_before = present(&event.before_state);
    let has_after = present(&event.after_state);
    match event.action {
        Action::Create if has_before => Err(ChainError::EncodingError {
            reason: format!("create of {} must not carry a before state", event.entity_ref),
        }),
        Action::Delete if has_after => Err(ChainError::EncodingError {
            reason: format!("delete of {} must not carry an after state", event.entity_ref),
        }),
        _ => Ok(()),
    }
}

/// A top-level `null` snapshot means "absent".
fn present(state: &Option<StateValue>) -> bool {
    !matches!(state, None | Some(StateValue::Null))
}

fn normalize(mut event: AuditEvent) -> AuditEvent {
    if !present(&event.before_state) {
        event.before_state = None;
    }
    if !present(&event.after_state) {
        event.after_state = None;
    }
    event
}

/// Millisecond-truncated clock reading, clamped so it never precedes the
/// partition's last timestamp.
fn commit_time(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
