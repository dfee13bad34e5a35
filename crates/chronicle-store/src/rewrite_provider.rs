use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chronicle_core::Record;
use chronicle_jsonl::BackupRef;
use chronicle_repair::RepairOperation;
use serde_json::Value;

use crate::error::StoreError;
use crate::provider::{AppliedRepair, PersistenceProvider};

pub const DEFAULT_UNDO_STACK_DEPTH: usize = 10;
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_LOCK_STALE: Duration = Duration::from_secs(30);

/// In-place JSONL rewrite provider. Each `apply` snapshots the session file
/// before rewriting it, maintaining a bounded undo stack of the last
/// `undo_stack_depth` snapshots per session.
pub struct RewriteProvider {
    session_dir: PathBuf,
    backup_dir: PathBuf,
    undo_stack_depth: usize,
    undo_stacks: HashMap<String, VecDeque<BackupRef>>,
    lock_wait: Duration,
    lock_stale: Duration,
}

impl RewriteProvider {
    pub fn new(session_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            backup_dir: backup_dir.into(),
            undo_stack_depth: DEFAULT_UNDO_STACK_DEPTH,
            undo_stacks: HashMap::new(),
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_stale: DEFAULT_LOCK_STALE,
        }
    }

    pub fn with_undo_stack_depth(mut self, depth: usize) -> Self {
        self.undo_stack_depth = depth.max(1);
        self
    }

    pub fn set_lock_policy(&mut self, wait: Duration, stale: Duration) {
        self.lock_wait = wait;
        self.lock_stale = stale;
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(format!("{session_id}.jsonl"))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.session_path(session_id).with_extension("lock")
    }

    /// Writes a copy of `session_id`'s current file contents to
    /// `destination_dir`, for handing the session off to another store
    /// without losing the backup trail it came with.
    pub fn export_session(&self, session_id: &str, destination_dir: &Path) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(destination_dir).map_err(|source| {
            StoreError::Jsonl(chronicle_jsonl::JsonlError::Io {
                path: destination_dir.to_path_buf(),
                source,
            })
        })?;
        let destination = destination_dir.join(format!("{session_id}.jsonl"));
        std::fs::copy(self.session_path(session_id), &destination).map_err(|source| {
            StoreError::Jsonl(chronicle_jsonl::JsonlError::Io {
                path: destination.clone(),
                source,
            })
        })?;
        Ok(destination)
    }
}

impl PersistenceProvider for RewriteProvider {
    fn apply(&mut self, session_id: &str, op: &RepairOperation, _operator: &str) -> Result<AppliedRepair, StoreError> {
        let path = self.session_path(session_id);
        let _lock = chronicle_jsonl::acquire_lock(&self.lock_path(session_id), self.lock_wait, self.lock_stale)?;

        let (mut records, _diagnostics) = chronicle_jsonl::load(&path)?;
        let index = records
            .iter()
            .position(|record| record.uuid == op.target_uuid)
            .ok_or_else(|| StoreError::TargetNotFound(op.target_uuid.clone()))?;

        if op.field != "parent_uuid" {
            return Err(StoreError::UnsupportedField(op.field.clone()));
        }

        let before = Value::String(records[index].to_json_line());
        let new_parent = match &op.new_value {
            Value::String(value) => Some(value.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        };
        records[index].set_parent_uuid(new_parent);
        let after = Value::String(records[index].to_json_line());

        let backup_ref = chronicle_jsonl::save(&path, session_id, &records, Some(&self.backup_dir))?;

        if let Some(backup_ref) = backup_ref.clone() {
            let stack = self.undo_stacks.entry(session_id.to_string()).or_default();
            stack.push_back(backup_ref);
            while stack.len() > self.undo_stack_depth {
                stack.pop_front();
            }
        }

        Ok(AppliedRepair {
            event_id: None,
            backup_ref,
            before,
            after,
        })
    }

    fn undo_last(&mut self, session_id: &str) -> Result<AppliedRepair, StoreError> {
        let path = self.session_path(session_id);
        let _lock = chronicle_jsonl::acquire_lock(&self.lock_path(session_id), self.lock_wait, self.lock_stale)?;

        let before = Value::String(std::fs::read_to_string(&path).unwrap_or_default());
        let backup_ref = self
            .undo_stacks
            .get_mut(session_id)
            .and_then(VecDeque::pop_back)
            .ok_or_else(|| StoreError::NothingToUndo(session_id.to_string()))?;

        chronicle_jsonl::restore_from_backup(&backup_ref, &path)?;
        let after = Value::String(std::fs::read_to_string(&path).unwrap_or_default());

        Ok(AppliedRepair {
            event_id: None,
            backup_ref: Some(backup_ref),
            before,
            after,
        })
    }

    fn list_backups(&self, session_id: &str) -> Vec<BackupRef> {
        chronicle_jsonl::list_backups(&self.backup_dir, session_id)
    }

    fn rollback(&mut self, session_id: &str, backup: &BackupRef) -> Result<(), StoreError> {
        let path = self.session_path(session_id);
        let _lock = chronicle_jsonl::acquire_lock(&self.lock_path(session_id), self.lock_wait, self.lock_stale)?;
        chronicle_jsonl::restore_from_backup(backup, &path)?;
        Ok(())
    }

    fn history(&self, _session_id: &str) -> Vec<AppliedRepair> {
        Vec::new()
    }
}
