use thiserror::Error;

/// Failure taxonomy for the event store (spec.md §7). Digest and
/// immutability failures are fatal and never retried; `BackendUnavailable`
/// is the one variant the manager retries with bounded backoff.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event {0} already exists in the log")]
    DuplicateEvent(String),

    #[error("event {event_id} digest does not match its immutable fields")]
    DigestMismatch { event_id: String },

    #[error("immutability violation: {0}")]
    ImmutabilityViolation(String),

    #[error("event store backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("event {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EventError {
    /// Whether the manager's retry loop should attempt this operation
    /// again. Only transient backend errors are retryable; corruption and
    /// protocol violations surface immediately (spec.md §4.8, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
