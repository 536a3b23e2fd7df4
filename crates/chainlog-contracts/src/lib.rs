//! # chainlog-contracts
//!
//! Shared types and errors for the chainlog audit ledger.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, the canonical snapshot value, report
//! shapes, and the error taxonomy.

pub mod entry;
pub mod error;
pub mod hash;
pub mod query;
pub mod report;
pub mod state;

pub use entry::{Action, AuditEntry, AuditEvent, ChainTail, Checkpoint, EntityRef, EntryId};
pub use error::{ChainError, ChainResult};
pub use hash::ChainHash;
pub use query::QueryFilter;
pub use report::{BreakKind, ChainBreak, VerificationReport, VerifiedEntry};
pub use state::StateValue;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_entry() -> AuditEntry {
        AuditEntry {
            entry_id: EntryId::new(),
            partition_key: "org-1".to_string(),
            sequence: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            actor_id: "user-7".to_string(),
            action: Action::Create,
            entity_ref: EntityRef::new("invoice", "1"),
            before_state: None,
            after_state: Some(StateValue::map([("total", StateValue::Integer(100))])),
            idempotency_key: None,
            previous_hash: ChainHash::GENESIS,
            current_hash: ChainHash([7u8; 32]),
        }
    }

    // ── ChainHash ────────────────────────────────────────────────────────────

    #[test]
    fn genesis_hash_is_sixty_four_zeros() {
        assert_eq!(ChainHash::GENESIS.to_hex(), "0".repeat(64));
        assert!(ChainHash::GENESIS.is_genesis());
    }

    #[test]
    fn chain_hash_parses_its_own_hex() {
        let h = ChainHash([0xab; 32]);
        assert_eq!(h.to_hex().parse::<ChainHash>().unwrap(), h);
    }

    #[test]
    fn chain_hash_rejects_wrong_length_and_bad_hex() {
        assert!(ChainHash::from_hex("abcd").is_err());
        assert!(ChainHash::from_hex(&"zz".repeat(32)).is_err());
    }

    // ── StateValue ───────────────────────────────────────────────────────────

    #[test]
    fn state_value_from_json_sorts_map_keys() {
        let v = StateValue::try_from(json!({ "b": 1, "a": [true, null, "x"], "c": 1.5 })).unwrap();
        match &v {
            StateValue::Map(m) => {
                let keys: Vec<&str> = m.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["a", "b", "c"]);
            }
            other => panic!("expected Map, got {:?}", other),
        }
        assert_eq!(v.get("b"), Some(&StateValue::Integer(1)));
        assert_eq!(v.get("c"), Some(&StateValue::Float(1.5)));
    }

    #[test]
    fn state_value_rejects_integers_beyond_i64() {
        let err = StateValue::try_from(json!(u64::MAX)).unwrap_err();
        assert!(matches!(err, ChainError::EncodingError { .. }));
    }

    #[test]
    fn state_value_json_shape_survives_storage() {
        let v = StateValue::try_from(json!({ "total": 100, "rate": 2.0, "tags": ["a"] })).unwrap();
        let text = serde_json::to_string(&v).unwrap();
        let back: StateValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, v, "integers must stay integers and floats floats");
        assert_eq!(v.to_json(), json!({ "total": 100, "rate": 2.0, "tags": ["a"] }));
    }

    // ── Action ───────────────────────────────────────────────────────────────

    #[test]
    fn action_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&Action::CompensatingCorrection).unwrap(),
            "\"compensating_correction\""
        );
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("rename".parse::<Action>().is_err());
    }

    // ── AuditEntry ───────────────────────────────────────────────────────────

    #[test]
    fn stored_entry_layout_uses_hex_hashes() {
        let entry = sample_entry();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["previous_hash"], json!("0".repeat(64)));
        assert_eq!(value["action"], json!("create"));
        assert_eq!(value["entity_ref"], json!({ "entity_type": "invoice", "entity_id": "1" }));
        assert_eq!(value["before_state"], json!(null));

        let back: AuditEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn chain_tail_of_entry_tracks_hash_and_time() {
        let entry = sample_entry();
        let tail = ChainTail::of(&entry);
        assert_eq!(tail.sequence, 1);
        assert_eq!(tail.hash, entry.current_hash);
        assert_eq!(tail.timestamp, Some(entry.timestamp));
        assert!(ChainTail::GENESIS.is_empty());
    }

    // ── QueryFilter ──────────────────────────────────────────────────────────

    #[test]
    fn query_filter_matches_on_every_set_field() {
        let entry = sample_entry();
        assert!(QueryFilter::default().matches(&entry));
        assert!(QueryFilter::default().actor("user-7").action(Action::Create).matches(&entry));
        assert!(QueryFilter::default().entity("invoice", "1").matches(&entry));
        assert!(!QueryFilter::default().entity("invoice", "2").matches(&entry));
        assert!(!QueryFilter::default().action(Action::Delete).matches(&entry));

        let until_now = QueryFilter {
            until: Some(entry.timestamp),
            ..QueryFilter::default()
        };
        assert!(!until_now.matches(&entry), "until is exclusive");
    }

    // ── Reports & errors ─────────────────────────────────────────────────────

    #[test]
    fn failing_report_converts_to_chain_broken() {
        let report = VerificationReport {
            partition_key: "org-1".to_string(),
            from_sequence: 1,
            to_sequence: 2,
            entries_checked: 1,
            valid: false,
            complete: true,
            break_point: Some(ChainBreak {
                sequence: 1,
                stored_sequence: Some(1),
                entry_id: Some(EntryId::new()),
                kind: BreakKind::ContentMismatch,
                expected_hash: None,
                found_hash: None,
                detail: None,
            }),
            last_good: None,
        };

        let rendered = report.to_string();
        assert!(rendered.contains("BROKEN"));
        assert!(rendered.contains("content mismatch"));

        match report.ensure_valid() {
            Err(ChainError::ChainBroken { sequence, kind, .. }) => {
                assert_eq!(sequence, 1);
                assert_eq!(kind, BreakKind::ContentMismatch);
            }
            other => panic!("expected ChainBroken, got {:?}", other),
        }
    }

    #[test]
    fn unreadable_break_renders_detail() {
        let report = VerificationReport {
            partition_key: "p".to_string(),
            from_sequence: 1,
            to_sequence: 3,
            entries_checked: 2,
            valid: false,
            complete: true,
            break_point: Some(ChainBreak {
                sequence: 2,
                stored_sequence: None,
                entry_id: None,
                kind: BreakKind::ContentMismatch,
                expected_hash: None,
                found_hash: None,
                detail: Some("expected u64".to_string()),
            }),
            last_good: None,
        };

        let rendered = report.to_string();
        assert!(rendered.contains("#2 (content mismatch), unreadable record"));
        assert!(rendered.contains("expected u64"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["break_point"]["entry_id"], json!(null));
        assert_eq!(value["break_point"]["detail"], json!("expected u64"));
    }

    #[test]
    fn only_storage_unavailable_is_retryable() {
        assert!(ChainError::StorageUnavailable { reason: "io".to_string() }.is_retryable());
        assert!(!ChainError::IntegrityViolation {
            partition_key: "p".to_string(),
            reason: "dup".to_string(),
        }
        .is_retryable());
        assert!(!ChainError::EncodingError { reason: "nan".to_string() }.is_retryable());
    }

    #[test]
    fn error_messages_carry_context() {
        let msg = ChainError::IntegrityViolation {
            partition_key: "org-1".to_string(),
            reason: "sequence 3 already committed".to_string(),
        }
        .to_string();
        assert!(msg.contains("org-1"));
        assert!(msg.contains("sequence 3 already committed"));

        let msg = ChainError::InvalidRange { from: 5, to: 2 }.to_string();
        assert!(msg.contains("5..=2"));
    }
}
