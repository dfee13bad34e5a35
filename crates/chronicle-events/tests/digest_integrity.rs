//! Property test for spec.md §8's "digest integrity" invariant:
//! `sha256(canonical(e)) == e.event_digest` for every written event, and
//! any tamper to an immutable field is caught by `append`/`verify` before
//! the event is trusted.

use chronicle_events::{verify, EventStore, RepairEvent};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).single().unwrap()
}

fn build_event(id: &str, message: &str, old: Option<String>, new: Option<String>, ts: DateTime<Utc>) -> RepairEvent {
    let digest = RepairEvent::compute_digest(id, "s", ts, message, old.as_deref(), new.as_deref());
    RepairEvent {
        event_id: id.to_string(),
        session_id: "s".to_string(),
        message_id: message.to_string(),
        old_parent: old,
        new_parent: new,
        operator: "tester".to_string(),
        reason: "property test".to_string(),
        similarity_score: 0.5,
        validation_passed: true,
        timestamp: ts,
        created_at: ts,
        is_reverted: false,
        reverts_event_id: None,
        event_digest: digest,
    }
}

proptest! {
    #[test]
    fn digest_is_self_consistent_for_any_field_combination(
        id in "[a-z]{4,8}",
        message in "[a-z]{4,8}",
        old in prop::option::of("[a-z]{1,6}"),
        new in prop::option::of("[a-z]{1,6}"),
        seconds in 0i64..100_000,
    ) {
        let event = build_event(&id, &message, old, new, timestamp(seconds));
        prop_assert!(event.digest_is_valid());
    }

    #[test]
    fn tampering_any_digested_field_invalidates_it(
        id in "[a-z]{4,8}",
        message in "[a-z]{4,8}",
        new in "[a-z]{1,6}",
        tampered in "[a-z]{1,6}",
        seconds in 0i64..100_000,
    ) {
        prop_assume!(new != tampered);
        let mut event = build_event(&id, &message, None, Some(new), timestamp(seconds));
        event.new_parent = Some(tampered);
        prop_assert!(!event.digest_is_valid());
    }

    #[test]
    fn appended_events_always_verify_clean(
        events in prop::collection::vec(
            ("[a-z]{4,10}", "[a-z]{2,6}", prop::option::of("[a-z]{1,4}"), 0i64..50_000),
            1..8,
        )
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let mut seen_ids = std::collections::HashSet::new();
        let mut appended = 0usize;

        for (id, message, new, seconds) in events {
            if !seen_ids.insert(id.clone()) {
                continue;
            }
            let event = build_event(&id, &message, None, new, timestamp(seconds));
            store.append(&event).unwrap();
            appended += 1;
        }

        let report = verify(&store, "s").unwrap();
        prop_assert!(report.is_ok());
        prop_assert_eq!(report.checked_events, appended);
    }
}
