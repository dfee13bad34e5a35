use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Jsonl(#[from] chronicle_jsonl::JsonlError),
    #[error("record {0} not found in session")]
    TargetNotFound(String),
    #[error("unsupported repair field: {0}")]
    UnsupportedField(String),
    #[error("no backup available to undo for session {0}")]
    NothingToUndo(String),
    #[error("backup not found for session {0}")]
    BackupNotFound(String),
    #[error("event store backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("event digest mismatch for event {0}")]
    DigestMismatch(String),
    #[error("immutability violation: {0}")]
    ImmutabilityViolation(String),
    #[error("event {0} not found")]
    EventNotFound(String),
}
