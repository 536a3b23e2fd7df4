//! Chain verification report types.
//!
//! A `VerificationReport` is structured so it can be rendered by a CLI or
//! returned from an API without further processing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    entry::EntryId,
    error::{ChainError, ChainResult},
    hash::ChainHash,
};

/// Which check an entry failed.
///
/// Content and linkage failures are different attack signatures: an edited
/// entry that was not re-hashed shows up as `ContentMismatch`, while a
/// spliced or reordered chain of self-consistent entries shows up as
/// `LinkageMismatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// The recomputed hash differs from the stored `current_hash`.
    ContentMismatch,
    /// The stored `previous_hash` differs from the preceding entry's hash.
    LinkageMismatch,
    /// The stored `sequence` is not the expected next position.
    SequenceMismatch,
    /// The timestamp is earlier than the preceding entry's.
    TimestampRegression,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakKind::ContentMismatch => "content mismatch",
            BreakKind::LinkageMismatch => "linkage mismatch",
            BreakKind::SequenceMismatch => "sequence mismatch",
            BreakKind::TimestampRegression => "timestamp regression",
        };
        f.write_str(s)
    }
}

/// The first point where a chain diverges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Position in the chain where the break was found.
    pub sequence: u64,
    /// The `sequence` field actually stored at that position; `None` when
    /// the stored record could not be decoded.
    pub stored_sequence: Option<u64>,
    pub entry_id: Option<EntryId>,
    pub kind: BreakKind,
    /// What the hash should have been (recomputed content hash for
    /// `ContentMismatch`, preceding entry's hash for `LinkageMismatch`).
    pub expected_hash: Option<ChainHash>,
    /// What was stored.
    pub found_hash: Option<ChainHash>,
    /// Why the stored record could not be decoded, if it could not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The last entry that passed every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedEntry {
    pub sequence: u64,
    pub entry_id: EntryId,
    pub current_hash: ChainHash,
}

/// Summary of one verification run over a partition range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub partition_key: String,
    /// Requested lower bound (inclusive).
    pub from_sequence: u64,
    /// Requested upper bound (inclusive).
    pub to_sequence: u64,
    pub entries_checked: u64,
    /// True when no break was found among the entries checked.
    pub valid: bool,
    /// False when the run was cancelled or hit its deadline before reaching
    /// the end of the range. The report still reflects everything checked.
    pub complete: bool,
    pub break_point: Option<ChainBreak>,
    pub last_good: Option<VerifiedEntry>,
}

impl VerificationReport {
    /// Convert a failing report into `ChainError::ChainBroken`.
    pub fn ensure_valid(self) -> ChainResult<Self> {
        match &self.break_point {
            Some(b) => Err(ChainError::ChainBroken {
                partition_key: self.partition_key.clone(),
                sequence: b.sequence,
                kind: b.kind,
            }),
            None => Ok(self),
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match (self.valid, self.complete) {
            (true, true) => "VALID",
            (true, false) => "VALID (partial)",
            (false, _) => "BROKEN",
        };
        writeln!(
            f,
            "partition '{}' [{}..={}]: {}",
            self.partition_key, self.from_sequence, self.to_sequence, status
        )?;
        writeln!(f, "  entries checked: {}", self.entries_checked)?;
        match &self.last_good {
            Some(g) => writeln!(f, "  last good:       #{} {}", g.sequence, g.current_hash)?,
            None => writeln!(f, "  last good:       (none)")?,
        }
        if let Some(b) = &self.break_point {
            match &b.entry_id {
                Some(id) => writeln!(f, "  break at:        #{} ({}), entry {}", b.sequence, b.kind, id)?,
                None => writeln!(f, "  break at:        #{} ({}), unreadable record", b.sequence, b.kind)?,
            }
            if let Some(detail) = &b.detail {
                writeln!(f, "    detail:        {detail}")?;
            }
            if let Some(h) = &b.expected_hash {
                writeln!(f, "    expected:      {h}")?;
            }
            if let Some(h) = &b.found_hash {
                writeln!(f, "    found:         {h}")?;
            }
        }
        Ok(())
    }
}
