use std::sync::Mutex;

use chronicle_events::{EventStore, EventStoreProvider};
use chronicle_materializer::Materializer;
use chronicle_repair::RepairOperation;
use chronicle_store::{AppliedRepair, PersistenceProvider, RewriteProvider, StoreError};

/// The persistence backend a [`crate::RepairManager`] was constructed
/// with. Chosen once and fixed for the manager's lifetime so a session's
/// audit trail never interleaves an in-place rewrite with an immutable
/// event append.
pub enum Backend {
    Rewrite(Mutex<RewriteProvider>),
    EventStore {
        store: EventStore,
        provider: Mutex<EventStoreProvider>,
        materializer: Materializer,
    },
}

impl Backend {
    pub fn rewrite(provider: RewriteProvider) -> Self {
        Backend::Rewrite(Mutex::new(provider))
    }

    pub fn event_sourced(store: EventStore) -> Self {
        Backend::EventStore {
            provider: Mutex::new(EventStoreProvider::new(store.clone())),
            store,
            materializer: Materializer::new(),
        }
    }

    pub fn apply(&self, session_id: &str, op: &RepairOperation, operator: &str) -> Result<AppliedRepair, StoreError> {
        match self {
            Backend::Rewrite(provider) => provider.lock().expect("rewrite provider lock poisoned").apply(session_id, op, operator),
            Backend::EventStore { provider, materializer, .. } => {
                let applied = provider.lock().expect("event store provider lock poisoned").apply(session_id, op, operator)?;
                materializer.mark_stale(session_id);
                Ok(applied)
            }
        }
    }

    pub fn undo_last(&self, session_id: &str) -> Result<AppliedRepair, StoreError> {
        match self {
            Backend::Rewrite(provider) => provider.lock().expect("rewrite provider lock poisoned").undo_last(session_id),
            Backend::EventStore { provider, materializer, .. } => {
                let applied = provider.lock().expect("event store provider lock poisoned").undo_last(session_id)?;
                materializer.mark_stale(session_id);
                Ok(applied)
            }
        }
    }

    pub fn history(&self, session_id: &str) -> Vec<AppliedRepair> {
        match self {
            Backend::Rewrite(provider) => provider.lock().expect("rewrite provider lock poisoned").history(session_id),
            Backend::EventStore { provider, .. } => provider.lock().expect("event store provider lock poisoned").history(session_id),
        }
    }

    /// The live event store, when this manager is event-sourced. `None`
    /// for a rewrite-backed session, which keeps no such log.
    pub fn event_store(&self) -> Option<&EventStore> {
        match self {
            Backend::Rewrite(_) => None,
            Backend::EventStore { store, .. } => Some(store),
        }
    }

    pub fn materializer(&self) -> Option<&Materializer> {
        match self {
            Backend::Rewrite(_) => None,
            Backend::EventStore { materializer, .. } => Some(materializer),
        }
    }
}
