//! Rebuilds and caches the current parent map for a session by replaying
//! its event log (spec.md C9). The cache lives here, not in
//! `chronicle-events`, so the event store itself stays a pure append/fetch
//! primitive with no notion of "current state".

mod cache;
mod materializer;

pub use cache::MaterializedSession;
pub use materializer::{Materializer, MaterializerError};
