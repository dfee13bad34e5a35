//! The Persistence Provider contract and its in-place JSONL rewrite
//! implementation. The other implementation, the immutable event store,
//! lives in `chronicle-events` since its append-only machinery is large
//! enough to be its own crate.

mod error;
mod provider;
mod rewrite_provider;

pub use error::StoreError;
pub use provider::{AppliedRepair, PersistenceProvider};
pub use rewrite_provider::{RewriteProvider, DEFAULT_UNDO_STACK_DEPTH};
