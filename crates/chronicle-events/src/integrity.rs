use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::EventError;
use crate::event::RepairEvent;
use crate::store::{EventStore, FetchOptions};

/// One event whose stored digest no longer matches its own immutable
/// fields — tampering or a protocol bug, never routine drift.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestMismatch {
    pub event_id: String,
    pub stored_digest: String,
    pub recomputed_digest: String,
}

/// Result of [`verify`]: recomputes every event's digest and the
/// session-wide digest over the sorted active event ids (spec.md §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityReport {
    pub session_id: String,
    pub checked_events: usize,
    pub digest_mismatches: Vec<DigestMismatch>,
    pub session_digest: String,
    pub last_event_id: Option<String>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.digest_mismatches.is_empty()
    }
}

/// Active event ids for a session: those not themselves a revert marker
/// and not the target of one (spec.md's own open question on
/// `is_reverted` semantics — resolved here: a revert and the event it
/// reverts are both retired from "active" bookkeeping, but both remain in
/// the log and both still fold into replay in timestamp order).
pub fn active_event_ids(events: &[RepairEvent]) -> BTreeSet<String> {
    let mut retired: BTreeSet<String> = events
        .iter()
        .filter(|event| event.is_reverted)
        .map(|event| event.event_id.clone())
        .collect();
    retired.extend(events.iter().filter_map(|event| event.reverts_event_id.clone()));

    events
        .iter()
        .map(|event| event.event_id.clone())
        .filter(|event_id| !retired.contains(event_id))
        .collect()
}

/// SHA-256 of the sorted, comma-joined active event ids — the
/// `materialization_digest` / session digest shared by the materializer
/// cache and this integrity check.
pub fn session_digest(active_ids: &BTreeSet<String>) -> String {
    let joined = active_ids.iter().cloned().collect::<Vec<_>>().join(",");
    let digest = Sha256::digest(joined.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Recomputes every event's digest and the session digest, reporting any
/// mismatch without repairing it: digest failures are fatal and must be
/// acknowledged by an operator (spec.md §8 scenario 5), never silently
/// patched.
pub fn verify(store: &EventStore, session_id: &str) -> Result<IntegrityReport, EventError> {
    let events = store.fetch(session_id, FetchOptions { include_reverted: true, ..Default::default() })?;

    let mut mismatches = Vec::new();
    for event in &events {
        let recomputed = event.recompute_digest();
        if recomputed != event.event_digest {
            mismatches.push(DigestMismatch {
                event_id: event.event_id.clone(),
                stored_digest: event.event_digest.clone(),
                recomputed_digest: recomputed,
            });
        }
    }

    let active_ids = active_event_ids(&events);
    let digest = session_digest(&active_ids);
    let last = events.last();

    Ok(IntegrityReport {
        session_id: session_id.to_string(),
        checked_events: events.len(),
        digest_mismatches: mismatches,
        session_digest: digest,
        last_event_id: last.map(|event| event.event_id.clone()),
        last_event_timestamp: last.map(|event| event.timestamp),
    })
}

/// Folds `events` (already chronologically sorted) into the current
/// parent for every message, last-write-wins — the replay spec.md §4.9
/// and §8's "replay = cache" property both describe. Revert events fold
/// in exactly like any other: their `new_parent` is the restored value.
pub fn replay(events: &[RepairEvent]) -> HashMap<String, Option<String>> {
    let mut parents = HashMap::new();
    for event in events {
        parents.insert(event.message_id.clone(), event.new_parent.clone());
    }
    parents
}
