use std::collections::HashMap;
use std::sync::Mutex;

use chronicle_events::{active_event_ids, replay, session_digest, EventError, EventStore, FetchOptions};
use chrono::Utc;
use thiserror::Error;

use crate::cache::MaterializedSession;

#[derive(Debug, Error)]
pub enum MaterializerError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("materialized cache for session {0} has drifted; call rebuild with an operator identity")]
    DriftDetected(String),
}

/// Rebuilds and caches a session's current parent map by replaying its
/// event log (spec.md C9). The cache is process-wide, keyed by session,
/// and only this type ever mutates it — matching §5's "shared resource
/// policy" and §9's "global state" design note.
pub struct Materializer {
    cache: Mutex<HashMap<String, MaterializedSession>>,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Materializer {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached session if fresh; otherwise performs a full
    /// rebuild from the event log and caches the result. Never returns a
    /// drifting cache entry silently: a drift flagged by [`Self::validate`]
    /// forces the next call here to rebuild.
    pub fn materialize(&self, store: &EventStore, session_id: &str) -> Result<MaterializedSession, MaterializerError> {
        {
            let cache = self.cache.lock().expect("materializer cache lock poisoned");
            if let Some(cached) = cache.get(session_id) {
                if !cached.is_stale && !cached.drift_detected {
                    return Ok(cached.clone());
                }
            }
        }
        self.rebuild(store, session_id)
    }

    /// Explicit incremental path: folds only events strictly newer than
    /// the cached `last_event_timestamp` onto the cached map, re-deriving
    /// statistics from the full event list. Falls back to a full rebuild
    /// when there is no cache to extend, it is already drifting, or it has
    /// no `last_event_timestamp` yet (spec.md §4.9 step 3).
    pub fn materialize_incremental(
        &self,
        store: &EventStore,
        session_id: &str,
    ) -> Result<MaterializedSession, MaterializerError> {
        let base = {
            let cache = self.cache.lock().expect("materializer cache lock poisoned");
            cache.get(session_id).cloned()
        };

        let Some(base) = base else {
            return self.rebuild(store, session_id);
        };
        if base.drift_detected || base.last_event_timestamp.is_none() {
            return self.rebuild(store, session_id);
        }
        if !base.is_stale {
            return Ok(base);
        }

        let all_events = store.fetch(session_id, FetchOptions { include_reverted: true, ..Default::default() })?;
        let since = base.last_event_timestamp.expect("checked above");
        let new_events: Vec<_> = all_events
            .iter()
            .filter(|event| event.timestamp > since)
            .cloned()
            .collect();

        let mut message_parents = base.message_parents.clone();
        for event in &new_events {
            message_parents.insert(event.message_id.clone(), event.new_parent.clone());
        }

        let active_ids = active_event_ids(&all_events);
        let last = all_events.last();
        let materialized = MaterializedSession {
            session_id: session_id.to_string(),
            message_parents,
            total_events: all_events.len(),
            active_events: active_ids.len(),
            reverted_events: all_events.len() - active_ids.len(),
            last_event_id: last.map(|event| event.event_id.clone()),
            last_event_timestamp: last.map(|event| event.timestamp),
            materialized_at: Utc::now(),
            materialization_digest: session_digest(&active_ids),
            is_stale: false,
            drift_detected: false,
        };

        let mut cache = self.cache.lock().expect("materializer cache lock poisoned");
        cache.insert(session_id.to_string(), materialized.clone());
        Ok(materialized)
    }

    /// Forces a full rebuild from the event log, bypassing and then
    /// replacing whatever is cached. Used both by the default `materialize`
    /// path and as the explicit "rebuild with operator identity" recovery
    /// from a flagged drift (spec.md §4.9).
    pub fn rebuild(&self, store: &EventStore, session_id: &str) -> Result<MaterializedSession, MaterializerError> {
        let events = store.fetch(session_id, FetchOptions { include_reverted: true, ..Default::default() })?;
        let message_parents = replay(&events);
        let active_ids = active_event_ids(&events);
        let last = events.last();

        let materialized = MaterializedSession {
            session_id: session_id.to_string(),
            message_parents,
            total_events: events.len(),
            active_events: active_ids.len(),
            reverted_events: events.len() - active_ids.len(),
            last_event_id: last.map(|event| event.event_id.clone()),
            last_event_timestamp: last.map(|event| event.timestamp),
            materialized_at: Utc::now(),
            materialization_digest: session_digest(&active_ids),
            is_stale: false,
            drift_detected: false,
        };

        let mut cache = self.cache.lock().expect("materializer cache lock poisoned");
        cache.insert(session_id.to_string(), materialized.clone());
        Ok(materialized)
    }

    /// Rebuilds into a scratch map and compares it against the cached
    /// entry without replacing it. A mismatch sets `drift_detected` on the
    /// cache in place (spec.md §8 "replay = cache" / scenario 4) so the
    /// next `materialize` call is forced to rebuild via an explicit
    /// operator-attributed call, never silently.
    pub fn validate(&self, store: &EventStore, session_id: &str) -> Result<bool, MaterializerError> {
        let events = store.fetch(session_id, FetchOptions { include_reverted: true, ..Default::default() })?;
        let fresh_parents = replay(&events);

        let mut cache = self.cache.lock().expect("materializer cache lock poisoned");
        let Some(cached) = cache.get_mut(session_id) else {
            return Ok(true);
        };

        if cached.message_parents == fresh_parents {
            Ok(true)
        } else {
            tracing::warn!(session_id, "materializer cache drift detected");
            cached.drift_detected = true;
            Ok(false)
        }
    }

    /// Marks a cached session stale, e.g. right after the manager appends
    /// a new repair event for it. A no-op if nothing is cached yet.
    pub fn mark_stale(&self, session_id: &str) {
        let mut cache = self.cache.lock().expect("materializer cache lock poisoned");
        if let Some(cached) = cache.get_mut(session_id) {
            cached.is_stale = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_events::RepairEvent;

    fn event(id: &str, message: &str, old: Option<&str>, new: Option<&str>, ts: chrono::DateTime<Utc>) -> RepairEvent {
        let digest = RepairEvent::compute_digest(id, "s", ts, message, old, new);
        RepairEvent {
            event_id: id.to_string(),
            session_id: "s".to_string(),
            message_id: message.to_string(),
            old_parent: old.map(str::to_string),
            new_parent: new.map(str::to_string),
            operator: "tester".to_string(),
            reason: "test".to_string(),
            similarity_score: 0.9,
            validation_passed: true,
            timestamp: ts,
            created_at: ts,
            is_reverted: false,
            reverts_event_id: None,
            event_digest: digest,
        }
    }

    #[test]
    fn materialize_rebuilds_then_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.append(&event("e1", "c", Some("ghost"), Some("b"), Utc::now())).unwrap();

        let materializer = Materializer::new();
        let first = materializer.materialize(&store, "s").unwrap();
        assert_eq!(first.message_parents.get("c").cloned().flatten(), Some("b".to_string()));
        assert_eq!(first.total_events, 1);

        // A second call must not need the store at all to return the same value.
        let second = materializer.materialize(&store, "s").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mark_stale_triggers_a_rebuild_on_next_materialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let t0 = Utc::now();
        store.append(&event("e1", "c", Some("ghost"), Some("b"), t0)).unwrap();

        let materializer = Materializer::new();
        materializer.materialize(&store, "s").unwrap();

        store.append(&event("e2", "c", Some("b"), Some("d"), t0 + chrono::Duration::seconds(1))).unwrap();
        materializer.mark_stale("s");

        let refreshed = materializer.materialize(&store, "s").unwrap();
        assert_eq!(refreshed.message_parents.get("c").cloned().flatten(), Some("d".to_string()));
        assert_eq!(refreshed.total_events, 2);
    }

    #[test]
    fn validate_detects_drift_and_rebuild_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let t0 = Utc::now();
        store.append(&event("e1", "c", Some("ghost"), Some("b"), t0)).unwrap();

        let materializer = Materializer::new();
        materializer.materialize(&store, "s").unwrap();

        // Corrupt the cache out from under the materializer to simulate drift.
        {
            let mut cache = materializer.cache.lock().unwrap();
            cache.get_mut("s").unwrap().message_parents.insert("c".to_string(), Some("wrong".to_string()));
        }

        let is_fresh = materializer.validate(&store, "s").unwrap();
        assert!(!is_fresh);

        let rebuilt = materializer.rebuild(&store, "s").unwrap();
        assert!(!rebuilt.drift_detected);
        assert_eq!(rebuilt.message_parents.get("c").cloned().flatten(), Some("b".to_string()));
    }

    #[test]
    fn incremental_materialize_folds_only_new_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let t0 = Utc::now();
        store.append(&event("e1", "c", Some("ghost"), Some("b"), t0)).unwrap();

        let materializer = Materializer::new();
        materializer.materialize(&store, "s").unwrap();

        store.append(&event("e2", "d", None, Some("c"), t0 + chrono::Duration::seconds(1))).unwrap();
        materializer.mark_stale("s");

        let refreshed = materializer.materialize_incremental(&store, "s").unwrap();
        assert_eq!(refreshed.message_parents.get("d").cloned().flatten(), Some("c".to_string()));
        assert_eq!(refreshed.message_parents.get("c").cloned().flatten(), Some("b".to_string()));
        assert_eq!(refreshed.total_events, 2);
    }
}
