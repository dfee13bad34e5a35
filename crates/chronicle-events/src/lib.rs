//! The immutable event store (spec.md C8): an append-only log of repair
//! events with SHA-256 digests, revert semantics, and replay, plus the
//! `PersistenceProvider` implementation that fronts it.

mod error;
mod event;
mod integrity;
mod provider;
mod store;

pub use error::EventError;
pub use event::RepairEvent;
pub use integrity::{active_event_ids, replay, session_digest, verify, DigestMismatch, IntegrityReport};
pub use provider::{EventStoreProvider, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_MS};
pub use store::{EventStore, FetchOptions};
