use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::EventError;
use crate::event::RepairEvent;

const LOCK_WAIT: std::time::Duration = std::time::Duration::from_secs(5);
const LOCK_STALE: std::time::Duration = std::time::Duration::from_secs(30);

/// Options for [`EventStore::fetch`]: a time bound and whether revert
/// events (`is_reverted == true`) should be included.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub until_ts: Option<DateTime<Utc>>,
    pub include_reverted: bool,
}

/// Append-only, per-session JSONL log of [`RepairEvent`]s. One file per
/// session under `root`; a sibling `.lock` file guards concurrent
/// cross-process appends the same way `chronicle_jsonl`'s rewrite path
/// does, except here a write only ever grows the file.
///
/// No code path exposed by this type can modify or delete a previously
/// written line: `append` opens the file in append mode and `fetch` never
/// truncates or rewrites it.
///
/// Cheap to clone: it's just a filesystem root, so callers that need the
/// store both inside a provider and alongside it (the repair manager)
/// don't have to fight a single owner for borrows.
#[derive(Debug, Clone)]
pub struct EventStore {
    root: PathBuf,
}

impl EventStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.events.jsonl"))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.log_path(session_id).with_extension("lock")
    }

    /// Appends exactly one event. Refuses a duplicate `event_id`
    /// (`DuplicateEvent`) and a digest that doesn't match the event's own
    /// immutable fields (`DigestMismatch`) before ever touching disk.
    pub fn append(&self, event: &RepairEvent) -> Result<(), EventError> {
        if !event.digest_is_valid() {
            return Err(EventError::DigestMismatch {
                event_id: event.event_id.clone(),
            });
        }

        std::fs::create_dir_all(&self.root)?;
        let lock = chronicle_jsonl::acquire_lock(&self.lock_path(&event.session_id), LOCK_WAIT, LOCK_STALE)
            .map_err(|source| EventError::BackendUnavailable(source.to_string()))?;

        let existing = self.read_raw(&event.session_id)?;
        if existing.iter().any(|stored| stored.event_id == event.event_id) {
            return Err(EventError::DuplicateEvent(event.event_id.clone()));
        }

        let path = self.log_path(&event.session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let line = serde_json::to_string(event).map_err(|error| {
            EventError::ImmutabilityViolation(format!("event {} failed to serialize: {error}", event.event_id))
        })?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        drop(lock);
        Ok(())
    }

    /// Every event ever appended for `session_id`, oldest write first,
    /// ignoring malformed lines (defensive only; this crate never writes
    /// one). Does not apply [`FetchOptions`] filtering or ordering.
    fn read_raw(&self, session_id: &str) -> Result<Vec<RepairEvent>, EventError> {
        let path = self.log_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        let events = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<RepairEvent>(line).ok())
            .collect();
        Ok(events)
    }

    /// Events for `session_id`, chronological by `timestamp` ascending,
    /// ties broken by `event_id` (spec.md §4.8) — linearizing any events
    /// that were appended out of order.
    pub fn fetch(&self, session_id: &str, options: FetchOptions) -> Result<Vec<RepairEvent>, EventError> {
        let mut events = self.read_raw(session_id)?;
        if !options.include_reverted {
            events.retain(|event| !event.is_reverted);
        }
        if let Some(until_ts) = options.until_ts {
            events.retain(|event| event.timestamp <= until_ts);
        }
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(events)
    }

    /// Emits a new event that logically undoes `event_id`: a fresh,
    /// separately-digested `RepairEvent` with `old_parent`/`new_parent`
    /// swapped from the original. The original line in the log is never
    /// rewritten (spec.md §4.8's "original event is never touched").
    pub fn revert(
        &self,
        session_id: &str,
        event_id: &str,
        operator: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RepairEvent, EventError> {
        let events = self.read_raw(session_id)?;
        let original = events
            .iter()
            .find(|event| event.event_id == event_id)
            .ok_or_else(|| EventError::NotFound(event_id.to_string()))?;

        let revert_id = format!("{event_id}-revert-{}", now.timestamp_nanos_opt().unwrap_or_default());
        let digest = RepairEvent::compute_digest(
            &revert_id,
            session_id,
            now,
            &original.message_id,
            original.new_parent.as_deref(),
            original.old_parent.as_deref(),
        );
        let revert_event = RepairEvent {
            event_id: revert_id,
            session_id: session_id.to_string(),
            message_id: original.message_id.clone(),
            old_parent: original.new_parent.clone(),
            new_parent: original.old_parent.clone(),
            operator: operator.to_string(),
            reason: reason.to_string(),
            similarity_score: original.similarity_score,
            validation_passed: true,
            timestamp: now,
            created_at: now,
            is_reverted: true,
            reverts_event_id: Some(original.event_id.clone()),
            event_digest: digest,
        };

        self.append(&revert_event)?;
        Ok(revert_event)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(session: &str, id: &str, message: &str, old: Option<&str>, new: Option<&str>, ts: DateTime<Utc>) -> RepairEvent {
        let digest = RepairEvent::compute_digest(id, session, ts, message, old, new);
        RepairEvent {
            event_id: id.to_string(),
            session_id: session.to_string(),
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
    fn append_then_fetch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let ts = Utc::now();
        let e1 = event("s", "e1", "c", Some("ghost"), Some("b"), ts);
        store.append(&e1).unwrap();

        let fetched = store.fetch("s", FetchOptions::default()).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].event_id, "e1");
    }

    #[test]
    fn duplicate_event_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let ts = Utc::now();
        let e1 = event("s", "e1", "c", None, Some("b"), ts);
        store.append(&e1).unwrap();
        let error = store.append(&e1).unwrap_err();
        assert!(matches!(error, EventError::DuplicateEvent(_)));
    }

    #[test]
    fn tampered_digest_is_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let mut e1 = event("s", "e1", "c", None, Some("b"), Utc::now());
        e1.new_parent = Some("tampered".to_string());
        let error = store.append(&e1).unwrap_err();
        assert!(matches!(error, EventError::DigestMismatch { .. }));
    }

    #[test]
    fn fetch_linearizes_out_of_order_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);
        let later = event("s", "later", "c", None, Some("b"), t1);
        let earlier = event("s", "earlier", "c", Some("b"), Some("d"), t0);
        store.append(&later).unwrap();
        store.append(&earlier).unwrap();

        let fetched = store.fetch("s", FetchOptions::default()).unwrap();
        assert_eq!(fetched[0].event_id, "earlier");
        assert_eq!(fetched[1].event_id, "later");
    }

    #[test]
    fn revert_emits_a_new_event_and_leaves_the_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let t0 = Utc::now();
        let original = event("s", "e1", "c", Some("ghost"), Some("b"), t0);
        store.append(&original).unwrap();

        let reverted = store
            .revert("s", "e1", "u", "undo", t0 + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(reverted.old_parent.as_deref(), Some("b"));
        assert_eq!(reverted.new_parent.as_deref(), Some("ghost"));
        assert_eq!(reverted.reverts_event_id.as_deref(), Some("e1"));
        assert!(reverted.is_reverted);

        let all = store.fetch("s", FetchOptions { include_reverted: true, ..Default::default() }).unwrap();
        assert_eq!(all.len(), 2);
        let stored_original = all.iter().find(|e| e.event_id == "e1").unwrap();
        assert_eq!(stored_original.new_parent.as_deref(), Some("b"));
        assert!(!stored_original.is_reverted);
    }

    #[test]
    fn fetch_excludes_reverted_events_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let t0 = Utc::now();
        let original = event("s", "e1", "c", Some("ghost"), Some("b"), t0);
        store.append(&original).unwrap();
        store.revert("s", "e1", "u", "undo", t0 + chrono::Duration::seconds(1)).unwrap();

        let fetched = store.fetch("s", FetchOptions::default()).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].event_id, "e1");
    }
}
