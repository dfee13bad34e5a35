use chronicle_jsonl::BackupRef;
use chronicle_repair::RepairOperation;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

/// Before/after snapshot of whatever a provider changed, for display to an
/// operator. `event_id`/`backup_ref` are populated by whichever capability
/// the concrete provider offers; both absent is valid (e.g. a dry run).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedRepair {
    pub event_id: Option<String>,
    pub backup_ref: Option<BackupRef>,
    pub before: Value,
    pub after: Value,
}

/// Contract every persistence backend implements: either an in-place
/// JSONL rewrite (`RewriteProvider`) or an immutable event append
/// (`chronicle-events::EventStoreProvider`). The manager is generic over
/// this trait so the audit trail never interleaves two backends for the
/// same session.
pub trait PersistenceProvider {
    fn apply(&mut self, session_id: &str, op: &RepairOperation, operator: &str) -> Result<AppliedRepair, StoreError>;
    fn undo_last(&mut self, session_id: &str) -> Result<AppliedRepair, StoreError>;
    fn list_backups(&self, session_id: &str) -> Vec<BackupRef>;
    fn rollback(&mut self, session_id: &str, backup: &BackupRef) -> Result<(), StoreError>;
    fn history(&self, session_id: &str) -> Vec<AppliedRepair>;
}
