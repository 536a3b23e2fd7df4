//! # chainlog-ledger
//!
//! The public entry point of chainlog: [`AuditLedger`] ties a store, the
//! chain writer, and the verifier together behind a record/query/verify
//! surface, and [`LedgerConfig`] builds one from TOML.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chainlog_ledger::{AuditLedger, LedgerConfig};
//!
//! let config = LedgerConfig::from_file(Path::new("chainlog.toml"))?;
//! let ledger = AuditLedger::from_config(&config)?;
//!
//! ledger.record("org-1", Action::Create, EntityRef::new("invoice", "1"),
//!               "user-7", None, Some(after))?;
//! ledger.verify("org-1", 1..=2)?.ensure_valid()?;
//! ```

pub mod config;
pub mod ledger;

pub use config::{LedgerConfig, StoreConfig, StoreKind, VerifyConfig, WriterConfig};
pub use ledger::{AuditLedger, EntryQuery};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use chainlog_contracts::{
        entry::{Action, AuditEntry, AuditEvent, EntityRef, EntryId},
        error::ChainError,
        hash::ChainHash,
        query::QueryFilter,
        report::BreakKind,
        state::StateValue,
    };
    use chainlog_store::InMemoryAppendStore;

    use super::{AuditLedger, LedgerConfig, StoreKind};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn total(n: i64) -> StateValue {
        StateValue::map([("total", StateValue::Integer(n))])
    }

    /// A ledger plus a handle on its store for out-of-band tampering.
    fn ledger() -> (AuditLedger, Arc<InMemoryAppendStore>) {
        let store = Arc::new(InMemoryAppendStore::new());
        (AuditLedger::new(store.clone()), store)
    }

    fn all(ledger: &AuditLedger, partition_key: &str, filter: QueryFilter) -> Vec<AuditEntry> {
        ledger
            .query(partition_key, filter)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// Create then update invoice 1 in "org-1".
    fn invoice_scenario(ledger: &AuditLedger) -> (EntryId, EntryId) {
        let created = ledger
            .record(
                "org-1",
                Action::Create,
                EntityRef::new("invoice", "1"),
                "user-7",
                None,
                Some(total(100)),
            )
            .unwrap();
        let updated = ledger
            .record(
                "org-1",
                Action::Update,
                EntityRef::new("invoice", "1"),
                "user-7",
                Some(total(100)),
                Some(total(150)),
            )
            .unwrap();
        (created, updated)
    }

    // ── End-to-end ────────────────────────────────────────────────────────────

    /// Create + update produce two linked entries that verify.
    #[test]
    fn test_invoice_scenario_verifies() {
        let (ledger, _) = ledger();
        let (created, updated) = invoice_scenario(&ledger);

        let entries = all(&ledger, "org-1", QueryFilter::default());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_id, created);
        assert_eq!(entries[1].entry_id, updated);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[1].sequence, 2);
        assert_eq!(entries[0].previous_hash, ChainHash::GENESIS);
        assert_eq!(entries[1].previous_hash, entries[0].current_hash);

        let report = ledger.verify("org-1", 1..=2).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 2);
        assert!(report.ensure_valid().is_ok());
    }

    /// Rewriting the first entry's after-state is a content mismatch at 1.
    #[test]
    fn test_tampered_snapshot_is_content_mismatch() {
        let (ledger, store) = ledger();
        invoice_scenario(&ledger);
        store.tamper("org-1", |e| e[0].after_state = Some(total(999)));

        let report = ledger.verify("org-1", 1..=2).unwrap();
        assert!(!report.valid);
        let found = report.break_point.clone().unwrap();
        assert_eq!(found.sequence, 1);
        assert_eq!(found.kind, BreakKind::ContentMismatch);

        assert!(matches!(
            report.ensure_valid(),
            Err(ChainError::ChainBroken {
                sequence: 1,
                kind: BreakKind::ContentMismatch,
                ..
            })
        ));
    }

    /// Swapping storage positions breaks linkage at the first displaced entry.
    #[test]
    fn test_swapped_entries_break_linkage() {
        let (ledger, store) = ledger();
        for i in 0..4 {
            ledger
                .record("p", Action::Create, EntityRef::new("doc", i.to_string()), "u", None, Some(total(i)))
                .unwrap();
        }
        store.tamper("p", |e| e.swap(0, 3));

        let found = ledger.verify_all("p").unwrap().break_point.unwrap();
        assert_eq!(found.sequence, 1);
        assert_eq!(found.kind, BreakKind::LinkageMismatch);
    }

    /// `verify_all` does not take the range from the stored tail, so an
    /// edited tail sequence cannot shrink what gets checked.
    #[test]
    fn test_verify_all_ignores_edited_tail_sequence() {
        let (ledger, store) = ledger();
        for i in 0..3 {
            ledger
                .record("p", Action::Create, EntityRef::new("doc", i.to_string()), "u", None, Some(total(i)))
                .unwrap();
        }
        store.tamper("p", |e| e[2].sequence = 1);

        let report = ledger.verify_all("p").unwrap();
        assert!(!report.valid);
        assert_eq!(report.entries_checked, 3);
        let found = report.break_point.unwrap();
        assert_eq!(found.sequence, 3);
        assert_eq!(found.stored_sequence, Some(1));
    }

    /// Concurrent recorders on one partition produce a gap-free chain.
    #[test]
    fn test_concurrent_records_verify() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        ledger
                            .record(
                                "shared",
                                Action::Create,
                                EntityRef::new("item", format!("{t}-{i}")),
                                format!("worker-{t}"),
                                None,
                                Some(total(i)),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let seqs: Vec<u64> = all(&ledger, "shared", QueryFilter::default())
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, (1..=200).collect::<Vec<_>>());

        let report = ledger.verify("shared", 1..=200).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 200);
    }

    /// The same range verified twice yields identical reports.
    #[test]
    fn test_repeated_verify_is_identical() {
        let (ledger, store) = ledger();
        invoice_scenario(&ledger);
        assert_eq!(
            ledger.verify("org-1", 1..=2).unwrap(),
            ledger.verify("org-1", 1..=2).unwrap()
        );

        store.tamper("org-1", |e| e[1].actor_id = "mallory".to_string());
        assert_eq!(
            ledger.verify("org-1", 1..=2).unwrap(),
            ledger.verify("org-1", 1..=2).unwrap()
        );
    }

    /// Re-submitting an event with the same key returns the original entry.
    #[test]
    fn test_idempotent_record_event() {
        let (ledger, _) = ledger();
        let event = AuditEvent::new(Action::Create, EntityRef::new("invoice", "9"), "user-1")
            .with_after(total(5))
            .with_idempotency_key("req-42");

        let first = ledger.record_event("org-1", event.clone()).unwrap();
        let again = ledger.record_event("org-1", event.clone()).unwrap();
        assert_eq!(first, again);
        assert_eq!(ledger.tail("org-1").unwrap().sequence, 1);

        // Keys are scoped per partition.
        let elsewhere = ledger.record_event("org-2", event).unwrap();
        assert_eq!(elsewhere.sequence, 1);
        assert_ne!(elsewhere.entry_id, first.entry_id);
    }

    // ── Query ─────────────────────────────────────────────────────────────────

    /// Filters are ANDed and the limit caps the stream.
    #[test]
    fn test_query_filters_and_limit() {
        let (ledger, _) = ledger();
        for i in 0..6 {
            let actor = if i % 2 == 0 { "alice" } else { "bob" };
            ledger
                .record("p", Action::Create, EntityRef::new("invoice", i.to_string()), actor, None, Some(total(i)))
                .unwrap();
        }
        ledger
            .record("p", Action::Delete, EntityRef::new("invoice", "0"), "alice", Some(total(0)), None)
            .unwrap();

        let alice = all(&ledger, "p", QueryFilter::default().actor("alice"));
        assert_eq!(alice.len(), 4);

        let deletes = all(&ledger, "p", QueryFilter::default().action(Action::Delete));
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].sequence, 7);

        let invoice_zero = all(&ledger, "p", QueryFilter::default().entity("invoice", "0"));
        let seqs: Vec<u64> = invoice_zero.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 7]);

        let limited = all(&ledger, "p", QueryFilter::default().actor("bob").limit(2));
        let seqs: Vec<u64> = limited.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 4]);

        let window = all(&ledger, "p", QueryFilter::default().sequences(3, 5));
        assert_eq!(window.len(), 3);

        assert!(matches!(
            ledger.query("p", QueryFilter::default().sequences(5, 3)),
            Err(ChainError::InvalidRange { from: 5, to: 3 })
        ));
        assert!(all(&ledger, "missing", QueryFilter::default()).is_empty());
    }

    // ── Introspection and checkpoints ─────────────────────────────────────────

    /// Tail and partition listing follow the recorded entries.
    #[test]
    fn test_tail_and_partitions() {
        let (ledger, _) = ledger();
        assert!(ledger.tail("org-1").unwrap().is_empty());
        assert!(ledger.partitions().unwrap().is_empty());

        invoice_scenario(&ledger);
        ledger
            .record("org-0", Action::Create, EntityRef::new("x", "1"), "u", None, Some(total(1)))
            .unwrap();

        let tail = ledger.tail("org-1").unwrap();
        assert_eq!(tail.sequence, 2);
        assert_eq!(ledger.partitions().unwrap(), vec!["org-0", "org-1"]);
    }

    /// A checkpoint keeps the suffix verifiable on a file-backed ledger.
    #[test]
    fn test_checkpoint_round_trip_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AuditLedger::from_config(&LedgerConfig::file(dir.path())).unwrap();

        invoice_scenario(&ledger);
        let checkpoint = ledger.checkpoint("org-1").unwrap();
        assert_eq!(checkpoint.sequence, 2);
        assert!(ledger.confirm_checkpoint(&checkpoint).unwrap());

        for i in 0..3 {
            ledger
                .record("org-1", Action::Update, EntityRef::new("invoice", "1"), "user-7", Some(total(i)), Some(total(i + 1)))
                .unwrap();
        }

        let report = ledger.verify_from_checkpoint(&checkpoint, u64::MAX).unwrap();
        assert!(report.valid);
        assert_eq!(report.from_sequence, 3);
        assert_eq!(report.entries_checked, 3);

        // Reopening the directory sees the same chain.
        let reopened = AuditLedger::from_config(&LedgerConfig::file(dir.path())).unwrap();
        assert!(reopened.verify_all("org-1").unwrap().valid);
        assert!(reopened.confirm_checkpoint(&checkpoint).unwrap());
    }

    /// A checkpoint of an empty partition anchors at genesis.
    #[test]
    fn test_checkpoint_of_empty_partition() {
        let (ledger, _) = ledger();
        let checkpoint = ledger.checkpoint("fresh").unwrap();
        assert_eq!(checkpoint.sequence, 0);
        assert!(checkpoint.hash.is_genesis());

        invoice_scenario(&ledger);
        let report = ledger.verify_from_checkpoint(&checkpoint, 10).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 0);
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    #[test]
    fn test_config_full_document() {
        let config = LedgerConfig::from_toml_str(
            r#"
            [store]
            kind = "file"
            root = "/var/lib/chainlog"

            [writer]
            lock_timeout_ms = 250

            [verify]
            deadline_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.lock_timeout().as_millis(), 250);
        assert_eq!(config.verify_deadline().map(|d| d.as_secs()), Some(30));
    }

    /// An empty document is an in-memory ledger with defaults.
    #[test]
    fn test_config_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.lock_timeout().as_secs(), 5);
        assert!(config.verify_deadline().is_none());
        assert!(AuditLedger::from_config(&config).is_ok());
    }

    #[test]
    fn test_config_rejects_bad_input() {
        for doc in [
            "[store]\nkind = \"file\"",
            "[store]\nkind = \"postgres\"",
            "[writer]\nlock_timeout_ms = 0",
            "[verify]\ndeadline_ms = 0",
            "[writer]\nlock_timeout = 10",
            "not toml at all [",
        ] {
            assert!(
                matches!(LedgerConfig::from_toml_str(doc), Err(ChainError::ConfigError { .. })),
                "accepted: {doc}"
            );
        }

        let missing = std::path::Path::new("/nonexistent/chainlog.toml");
        assert!(matches!(
            LedgerConfig::from_file(missing),
            Err(ChainError::ConfigError { .. })
        ));
    }

    // ── Properties ────────────────────────────────────────────────────────────

    fn arb_event() -> impl Strategy<Value = AuditEvent> {
        (0usize..4, "[a-z]{1,8}", "[a-z0-9]{1,6}", any::<i64>(), any::<i64>()).prop_map(
            |(a, actor, id, before, after)| {
                let action = Action::ALL[a];
                let mut event = AuditEvent::new(action, EntityRef::new("invoice", id), actor);
                if action != Action::Create {
                    event = event.with_before(total(before));
                }
                if action != Action::Delete {
                    event = event.with_after(total(after));
                }
                event
            },
        )
    }

    /// Overwrite one field of `entry` with a value it cannot already hold.
    fn mutate_field(entry: &mut AuditEntry, field: usize) {
        match field {
            0 => entry.entry_id = EntryId::new(),
            1 => entry.partition_key.push('x'),
            2 => entry.sequence += 1000,
            3 => entry.timestamp += chrono::Duration::milliseconds(1),
            4 => entry.actor_id.push('x'),
            5 => {
                let idx = Action::ALL.iter().position(|a| *a == entry.action).unwrap_or(0);
                entry.action = Action::ALL[(idx + 1) % Action::ALL.len()];
            }
            6 => entry.entity_ref.entity_id.push('x'),
            7 => entry.before_state = Some(StateValue::String("forged".to_string())),
            8 => entry.after_state = Some(StateValue::Bool(true)),
            9 => entry.idempotency_key = Some("forged".to_string()),
            10 => entry.previous_hash = ChainHash([0xee; 32]),
            _ => entry.current_hash = ChainHash([0xee; 32]),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever is recorded on a fresh partition verifies.
        #[test]
        fn prop_recorded_chain_verifies(events in prop::collection::vec(arb_event(), 1..12)) {
            let (ledger, _) = ledger();
            for event in &events {
                ledger.record_event("p", event.clone()).unwrap();
            }
            let report = ledger.verify_all("p").unwrap();
            prop_assert!(report.valid);
            prop_assert_eq!(report.entries_checked, events.len() as u64);
        }

        /// Changing any one field of any stored entry breaks the chain there.
        #[test]
        fn prop_single_field_tamper_is_located(
            events in prop::collection::vec(arb_event(), 1..10),
            pick in any::<prop::sample::Index>(),
            field in 0usize..12,
        ) {
            let (ledger, store) = ledger();
            for event in &events {
                ledger.record_event("p", event.clone()).unwrap();
            }
            let k = pick.index(events.len());
            store.tamper("p", |e| mutate_field(&mut e[k], field));

            let report = ledger.verify("p", 1..=events.len() as u64).unwrap();
            prop_assert!(!report.valid);
            let found = report.break_point.unwrap();
            prop_assert_eq!(found.sequence, k as u64 + 1);
        }
    }
}
