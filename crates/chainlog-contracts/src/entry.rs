//! Audit entry, event, and identity types.
//!
//! `AuditEvent` is what the business application hands in. `AuditEntry` is
//! what the chain writer commits: the event plus partition, sequence,
//! timestamp, and the two hashes that make tampering detectable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{hash::ChainHash, state::StateValue};

/// Globally unique identifier of a committed entry. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub uuid::Uuid);

impl EntryId {
    /// Create a new, unique entry ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The closed set of event kinds the ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    /// A new entry correcting a prior entry's real-world effect. Entries are
    /// never edited, so this is the only way to fix a mistake.
    CompensatingCorrection,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::CompensatingCorrection,
    ];

    /// Stable snake_case name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::CompensatingCorrection => "compensating_correction",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown action '{s}' (expected create, update, delete, or compensating_correction)"
                )
            })
    }
}

/// Stable identifier of the business entity an event touches.
///
/// Example: `EntityRef::new("invoice", "1")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A mutation the business application wants recorded.
///
/// Carries everything except what the writer assigns at commit time
/// (`entry_id`, `sequence`, `timestamp`, and both hashes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: Action,
    pub entity_ref: EntityRef,
    /// The user or system principal that caused the event.
    pub actor_id: String,
    /// Absent for creates.
    pub before_state: Option<StateValue>,
    /// Absent for deletes.
    pub after_state: Option<StateValue>,
    /// Caller-assigned key that makes re-submission after a failed call safe.
    /// Scoped to one partition.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl AuditEvent {
    pub fn new(action: Action, entity_ref: EntityRef, actor_id: impl Into<String>) -> Self {
        Self {
            action,
            entity_ref,
            actor_id: actor_id.into(),
            before_state: None,
            after_state: None,
            idempotency_key: None,
        }
    }

    pub fn with_before(mut self, state: StateValue) -> Self {
        self.before_state = Some(state);
        self
    }

    pub fn with_after(mut self, state: StateValue) -> Self {
        self.after_state = Some(state);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// One committed, immutable link in a partition's hash chain.
///
/// `current_hash` commits to every other field, `previous_hash` included.
/// Changing any byte of a stored entry invalidates its `current_hash` and
/// the `previous_hash` of its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: EntryId,
    pub partition_key: String,
    /// Position in the partition, starting at 1, gap-free.
    pub sequence: u64,
    /// Commit time (UTC, millisecond precision), non-decreasing per partition.
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub action: Action,
    pub entity_ref: EntityRef,
    pub before_state: Option<StateValue>,
    pub after_state: Option<StateValue>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub previous_hash: ChainHash,
    pub current_hash: ChainHash,
}

/// The extension cursor of a partition: what the next append builds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTail {
    /// Sequence of the last committed entry; 0 for an empty partition.
    pub sequence: u64,
    /// `current_hash` of the last entry, or `ChainHash::GENESIS`.
    pub hash: ChainHash,
    /// Timestamp of the last entry, if any.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChainTail {
    /// The tail of a partition with no entries.
    pub const GENESIS: ChainTail = ChainTail {
        sequence: 0,
        hash: ChainHash::GENESIS,
        timestamp: None,
    };

    pub fn of(entry: &AuditEntry) -> Self {
        Self {
            sequence: entry.sequence,
            hash: entry.current_hash,
            timestamp: Some(entry.timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }
}

/// A recorded tail that can stand in for genesis when verifying a suffix.
///
/// Taken before old entries are archived elsewhere, so whatever range
/// remains is still verifiable. Signing is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub partition_key: String,
    pub sequence: u64,
    pub hash: ChainHash,
    pub timestamp: Option<DateTime<Utc>>,
    pub taken_at: DateTime<Utc>,
}
