use std::thread;
use std::time::Duration;

use chronicle_jsonl::BackupRef;
use chronicle_repair::RepairOperation;
use chronicle_store::{AppliedRepair, PersistenceProvider, StoreError};
use chrono::Utc;
use rand::Rng as _;
use serde_json::Value;

use crate::error::EventError;
use crate::event::RepairEvent;
use crate::store::{EventStore, FetchOptions};

pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 100;

/// Immutable-event-append persistence backend (spec.md C8/§4.7). Each
/// `apply` appends one [`RepairEvent`]; `undo_last` reverts the most
/// recently appended, still-active event for the session. Never mutates
/// the underlying JSONL session file directly.
pub struct EventStoreProvider {
    store: EventStore,
    retry_attempts: usize,
    retry_base_ms: u64,
}

impl EventStoreProvider {
    pub fn new(store: EventStore) -> Self {
        Self {
            store,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Runs `op`, retrying only [`EventError::BackendUnavailable`] up to
    /// `retry_attempts` times with jittered exponential backoff
    /// (spec.md §4.8). Digest/immutability failures are fatal and bubble
    /// on the first attempt.
    fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T, EventError>) -> Result<T, EventError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < self.retry_attempts => {
                    let backoff_ms = self.retry_base_ms.saturating_mul(1u64 << attempt);
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff_ms.max(1));
                    tracing::warn!(attempt, backoff_ms, %error, "event store backend unavailable, retrying");
                    thread::sleep(Duration::from_millis(jitter_ms));
                    attempt += 1;
                }
                Err(error) => {
                    if matches!(error, EventError::DigestMismatch { .. } | EventError::ImmutabilityViolation(_)) {
                        tracing::error!(%error, "fatal event store failure");
                    }
                    return Err(error);
                }
            }
        }
    }

    /// `RepairOperation` doesn't carry a `session_id` (spec.md §3 keeps it
    /// generic over any record field), so the caller's own session scope
    /// is threaded in here explicitly rather than guessed at.
    fn to_repair_event(
        session_id: &str,
        op: &RepairOperation,
        operator: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<RepairEvent, StoreError> {
        if op.field != "parent_uuid" {
            return Err(StoreError::UnsupportedField(op.field.clone()));
        }
        let old_parent = value_to_opt_string(&op.old_value);
        let new_parent = value_to_opt_string(&op.new_value);
        let event_id = format!("{}-{}", op.target_uuid, now.timestamp_nanos_opt().unwrap_or_default());
        let digest = RepairEvent::compute_digest(
            &event_id,
            session_id,
            now,
            &op.target_uuid,
            old_parent.as_deref(),
            new_parent.as_deref(),
        );
        Ok(RepairEvent {
            event_id,
            session_id: session_id.to_string(),
            message_id: op.target_uuid.clone(),
            old_parent,
            new_parent,
            operator: operator.to_string(),
            reason: op.reason.clone(),
            similarity_score: op.similarity_score,
            validation_passed: true,
            timestamp: now,
            created_at: now,
            is_reverted: false,
            reverts_event_id: None,
            event_digest: digest,
        })
    }
}

fn value_to_opt_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn map_err(error: EventError) -> StoreError {
    match error {
        EventError::DuplicateEvent(id) => StoreError::EventNotFound(format!("duplicate event {id}")),
        EventError::DigestMismatch { event_id } => StoreError::DigestMismatch(event_id),
        EventError::ImmutabilityViolation(message) => StoreError::ImmutabilityViolation(message),
        EventError::BackendUnavailable(message) => StoreError::BackendUnavailable(message),
        EventError::NotFound(id) => StoreError::EventNotFound(id),
        EventError::Io(source) => StoreError::BackendUnavailable(source.to_string()),
    }
}

impl PersistenceProvider for EventStoreProvider {
    fn apply(&mut self, session_id: &str, op: &RepairOperation, operator: &str) -> Result<AppliedRepair, StoreError> {
        let now = Utc::now();
        let event = Self::to_repair_event(session_id, op, operator, now)?;

        self.with_retry(|| self.store.append(&event)).map_err(map_err)?;

        Ok(AppliedRepair {
            event_id: Some(event.event_id.clone()),
            backup_ref: None,
            before: op.old_value.clone(),
            after: op.new_value.clone(),
        })
    }

    fn undo_last(&mut self, session_id: &str) -> Result<AppliedRepair, StoreError> {
        // The literal most recent append, whether it was a repair or an
        // earlier revert — undo always targets whatever happened last.
        let all = self
            .with_retry(|| self.store.fetch(session_id, FetchOptions { include_reverted: true, ..Default::default() }))
            .map_err(map_err)?;
        let last = all
            .last()
            .ok_or_else(|| StoreError::NothingToUndo(session_id.to_string()))?
            .clone();

        let reverted = self
            .with_retry(|| self.store.revert(session_id, &last.event_id, "system-undo", "undo_last", Utc::now()))
            .map_err(map_err)?;

        Ok(AppliedRepair {
            event_id: Some(reverted.event_id.clone()),
            backup_ref: None,
            before: last.new_parent.clone().map(Value::String).unwrap_or(Value::Null),
            after: reverted.new_parent.clone().map(Value::String).unwrap_or(Value::Null),
        })
    }

    fn list_backups(&self, _session_id: &str) -> Vec<BackupRef> {
        Vec::new()
    }

    fn rollback(&mut self, _session_id: &str, _backup: &BackupRef) -> Result<(), StoreError> {
        Err(StoreError::BackupNotFound("event store provider has no file backups".to_string()))
    }

    fn history(&self, session_id: &str) -> Vec<AppliedRepair> {
        self.store
            .fetch(session_id, FetchOptions { include_reverted: true, ..Default::default() })
            .unwrap_or_default()
            .into_iter()
            .map(|event| AppliedRepair {
                event_id: Some(event.event_id),
                backup_ref: None,
                before: event.old_parent.map(Value::String).unwrap_or(Value::Null),
                after: event.new_parent.map(Value::String).unwrap_or(Value::Null),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(target: &str, old: Option<&str>, new: &str) -> RepairOperation {
        RepairOperation {
            target_uuid: target.to_string(),
            field: "parent_uuid".to_string(),
            old_value: old.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null),
            new_value: Value::String(new.to_string()),
            similarity_score: 0.8,
            reason: "temporal+keyword".to_string(),
            operator: "tester".to_string(),
        }
    }

    #[test]
    fn apply_appends_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = EventStoreProvider::new(EventStore::new(dir.path()));
        let applied = provider.apply("s", &op("c", Some("ghost"), "b"), "tester").unwrap();
        assert!(applied.event_id.is_some());

        let history = provider.history("s");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn undo_last_reverts_the_most_recent_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = EventStoreProvider::new(EventStore::new(dir.path()));
        provider.apply("s", &op("c", Some("ghost"), "b"), "tester").unwrap();
        let undone = provider.undo_last("s").unwrap();
        assert_eq!(undone.after, Value::String("ghost".to_string()));
    }

    #[test]
    fn undo_with_nothing_to_undo_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = EventStoreProvider::new(EventStore::new(dir.path()));
        let error = provider.undo_last("s").unwrap_err();
        assert!(matches!(error, StoreError::NothingToUndo(_)));
    }

    #[test]
    fn non_parent_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = EventStoreProvider::new(EventStore::new(dir.path()));
        let mut bad_op = op("c", None, "b");
        bad_op.field = "content".to_string();
        let error = provider.apply("s", &bad_op, "tester").unwrap_err();
        assert!(matches!(error, StoreError::UnsupportedField(_)));
    }
}
