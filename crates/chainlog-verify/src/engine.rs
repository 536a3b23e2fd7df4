//! Chain verifier for chainlog partitions.
//!
//! `ChainVerifier` streams a partition range from the store and checks each
//! entry, in order:
//!
//! 1. **Content** — the hash recomputed from the stored fields equals the
//!    stored `current_hash`.
//! 2. **Linkage** — the stored `previous_hash` equals the preceding entry's
//!    `current_hash` (genesis for sequence 1, the stored hash of `from - 1`
//!    for a sub-range, or a checkpoint hash).
//! 3. **Sequence** — the stored `sequence` is the entry's storage position.
//! 4. **Timestamp** — not earlier than the preceding entry's.
//!
//! A record the store cannot decode fails as a content mismatch at its
//! position. The first failing entry is the break point; checking stops there. The
//! verifier never writes and takes no writer lock, so it can run alongside
//! appends: committed entries never change, and anything appended beyond
//! the range is simply not read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chainlog_contracts::{
    entry::{AuditEntry, Checkpoint},
    error::{ChainError, ChainResult},
    hash::ChainHash,
    report::{BreakKind, ChainBreak, VerificationReport, VerifiedEntry},
};
use chainlog_core::{hash::hash_entry, traits::AppendStore};

/// Per-run controls for stopping early.
///
/// A run stopped by either control returns a partial report with
/// `complete = false`; everything it checked is still accurate.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Checked at every entry boundary; set it from another thread to cancel.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Wall-clock budget for the run.
    pub deadline: Option<Duration>,
}

impl VerifyOptions {
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What the first entry of a run must link to.
struct Anchor {
    /// `None` when the entry that should precede the range is missing.
    hash: Option<ChainHash>,
    timestamp: Option<DateTime<Utc>>,
}

/// Read-only verifier over an `AppendStore`.
pub struct ChainVerifier {
    store: Arc<dyn AppendStore>,
    /// Applied when a call passes no deadline of its own.
    default_deadline: Option<Duration>,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn AppendStore>) -> Self {
        Self {
            store,
            default_deadline: None,
        }
    }

    /// Bound every run that does not set its own deadline.
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Verify `[from, to]` of `partition_key`.
    ///
    /// An empty or unknown partition, or a range past the tail, is
    /// vacuously valid.
    ///
    /// # Errors
    ///
    /// `InvalidRange` if `from` is 0 or greater than `to`;
    /// `StorageUnavailable` from the store is propagated. A broken chain,
    /// unreadable records included, is NOT an error here: it is reported.
    pub fn verify(
        &self,
        partition_key: &str,
        from: u64,
        to: u64,
    ) -> ChainResult<VerificationReport> {
        self.verify_with(partition_key, from, to, &VerifyOptions::default())
    }

    /// `verify` with cancellation and deadline controls.
    pub fn verify_with(
        &self,
        partition_key: &str,
        from: u64,
        to: u64,
        options: &VerifyOptions,
    ) -> ChainResult<VerificationReport> {
        if from == 0 || from > to {
            return Err(ChainError::InvalidRange { from, to });
        }
        let anchor = self.anchor_before(partition_key, from)?;
        self.run(partition_key, from, to, anchor, options)
    }

    /// Verify `[checkpoint.sequence + 1, to]` using the checkpoint's hash as
    /// the link for the first entry.
    ///
    /// Works even when the entries up to the checkpoint are no longer in the
    /// store.
    pub fn verify_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        to: u64,
        options: &VerifyOptions,
    ) -> ChainResult<VerificationReport> {
        let from = checkpoint
            .sequence
            .checked_add(1)
            .ok_or(ChainError::InvalidRange {
                from: checkpoint.sequence,
                to,
            })?;
        if to < checkpoint.sequence {
            return Err(ChainError::InvalidRange { from, to });
        }
        let anchor = Anchor {
            hash: Some(checkpoint.hash),
            timestamp: checkpoint.timestamp,
        };
        self.run(&checkpoint.partition_key, from, to, anchor, options)
    }

    /// True if the stored entry at the checkpoint's position still carries
    /// the checkpoint's hash. An unreadable record there does not.
    pub fn confirm_checkpoint(&self, checkpoint: &Checkpoint) -> ChainResult<bool> {
        if checkpoint.sequence == 0 {
            return Ok(checkpoint.hash.is_genesis());
        }
        let stored = self.read_one(&checkpoint.partition_key, checkpoint.sequence)?;
        Ok(stored.is_some_and(|e| e.current_hash == checkpoint.hash))
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// The link expected by entry `from`.
    fn anchor_before(&self, partition_key: &str, from: u64) -> ChainResult<Anchor> {
        if from == 1 {
            return Ok(Anchor {
                hash: Some(ChainHash::GENESIS),
                timestamp: None,
            });
        }
        let previous = self.read_one(partition_key, from - 1)?;
        Ok(Anchor {
            hash: previous.as_ref().map(|e| e.current_hash),
            timestamp: previous.as_ref().map(|e| e.timestamp),
        })
    }

    /// The record at `position`, or `None` if it is missing or unreadable.
    fn read_one(&self, partition_key: &str, position: u64) -> ChainResult<Option<AuditEntry>> {
        match self.store.read_range(partition_key, position, position)?.next() {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(ChainError::IntegrityViolation { reason, .. })) => {
                warn!(partition_key = %partition_key, position, reason = %reason, "unreadable record");
                Ok(None)
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn run(
        &self,
        partition_key: &str,
        from: u64,
        to: u64,
        anchor: Anchor,
        options: &VerifyOptions,
    ) -> ChainResult<VerificationReport> {
        let started = Instant::now();
        let deadline = options.deadline.or(self.default_deadline);

        let mut expected_prev = anchor.hash;
        let mut expected_sequence = from;
        let mut last_timestamp = anchor.timestamp;

        let mut report = VerificationReport {
            partition_key: partition_key.to_string(),
            from_sequence: from,
            to_sequence: to,
            entries_checked: 0,
            valid: true,
            complete: true,
            break_point: None,
            last_good: None,
        };

        debug!(partition_key = %partition_key, from, to, "chain verification starting");

        for item in self.store.read_range(partition_key, from, to)? {
            if stop_requested(options, deadline, started) {
                report.complete = false;
                break;
            }

            report.entries_checked += 1;
            let checked = match item {
                Ok(entry) => {
                    match check_entry(&entry, expected_prev, expected_sequence, last_timestamp) {
                        Some(found) => Err(found),
                        None => Ok(entry),
                    }
                }
                Err(ChainError::IntegrityViolation { reason, .. }) => {
                    Err(unreadable(expected_sequence, reason))
                }
                Err(e) => return Err(e),
            };

            let entry = match checked {
                Ok(entry) => entry,
                Err(found) => {
                    warn!(
                        partition_key = %partition_key,
                        sequence = found.sequence,
                        kind = %found.kind,
                        entry_id = ?found.entry_id,
                        "hash chain broken"
                    );
                    report.valid = false;
                    report.break_point = Some(found);
                    break;
                }
            };

            expected_prev = Some(entry.current_hash);
            expected_sequence += 1;
            last_timestamp = Some(entry.timestamp);
            report.last_good = Some(VerifiedEntry {
                sequence: entry.sequence,
                entry_id: entry.entry_id,
                current_hash: entry.current_hash,
            });
        }

        if report.valid {
            info!(
                partition_key = %partition_key,
                entries_checked = report.entries_checked,
                complete = report.complete,
                "hash chain verified"
            );
        }

        Ok(report)
    }
}

fn stop_requested(options: &VerifyOptions, deadline: Option<Duration>, started: Instant) -> bool {
    let cancelled = options
        .cancel
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed));
    let expired = deadline.is_some_and(|d| started.elapsed() >= d);
    cancelled || expired
}

/// Run the four checks on one entry; `Some` describes the first failure.
fn check_entry(
    entry: &AuditEntry,
    expected_prev: Option<ChainHash>,
    expected_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
) -> Option<ChainBreak> {
    let fail = |kind, expected_hash, found_hash| {
        Some(ChainBreak {
            sequence: expected_sequence,
            stored_sequence: Some(entry.sequence),
            entry_id: Some(entry.entry_id),
            kind,
            expected_hash,
            found_hash,
            detail: None,
        })
    };

    // A stored entry that no longer encodes has been altered.
    let recomputed = hash_entry(entry).ok();
    if recomputed != Some(entry.current_hash) {
        return fail(BreakKind::ContentMismatch, recomputed, Some(entry.current_hash));
    }

    if expected_prev != Some(entry.previous_hash) {
        return fail(BreakKind::LinkageMismatch, expected_prev, Some(entry.previous_hash));
    }

    if entry.sequence != expected_sequence {
        return fail(BreakKind::SequenceMismatch, None, None);
    }

    if last_timestamp.is_some_and(|t| entry.timestamp < t) {
        return fail(BreakKind::TimestampRegression, None, None);
    }

    None
}

/// The break reported for a record the store could not decode.
fn unreadable(position: u64, reason: String) -> ChainBreak {
    ChainBreak {
        sequence: position,
        stored_sequence: None,
        entry_id: None,
        kind: BreakKind::ContentMismatch,
        expected_hash: None,
        found_hash: None,
        detail: Some(reason),
    }
}
