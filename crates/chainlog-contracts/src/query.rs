//! Read-side filters for `query`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Action, AuditEntry};

/// Criteria applied to a partition's entries. Every `None` field matches
/// anything; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Lower sequence bound (inclusive). Defaults to 1.
    pub from_sequence: Option<u64>,
    /// Upper sequence bound (inclusive). Defaults to the tail.
    pub to_sequence: Option<u64>,
    pub actor_id: Option<String>,
    pub action: Option<Action>,
    pub entity_type: Option<String>,
    /// Only meaningful together with `entity_type`.
    pub entity_id: Option<String>,
    /// Inclusive lower timestamp bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper timestamp bound.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of entries to yield.
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn sequences(mut self, from: u64, to: u64) -> Self {
        self.from_sequence = Some(from);
        self.to_sequence = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True if `entry` satisfies every field-level criterion. Sequence
    /// bounds and `limit` are applied by the reader, not here.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor) = &self.actor_id {
            if &entry.actor_id != actor {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(t) = &self.entity_type {
            if &entry.entity_ref.entity_type != t {
                return false;
            }
        }
        if let Some(id) = &self.entity_id {
            if &entry.entity_ref.entity_id != id {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp >= until {
                return false;
            }
        }
        true
    }
}
