use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Jsonl(#[from] chronicle_jsonl::JsonlError),
    #[error(transparent)]
    Store(#[from] chronicle_store::StoreError),
    #[error(transparent)]
    Event(#[from] chronicle_events::EventError),
    #[error(transparent)]
    Materializer(#[from] chronicle_materializer::MaterializerError),
    #[error(transparent)]
    Dedupe(#[from] chronicle_dedup::DedupError),
    #[error("no orphaned record {0} found in session {1}")]
    TargetNotOrphan(String, String),
    #[error("operation on session {0} was cancelled before any state changed")]
    Cancelled(String),
}
