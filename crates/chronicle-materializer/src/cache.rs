use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// The current parent map for a session, derived by replaying its
/// repair-event log, plus the bookkeeping spec.md §3 asks for. Cheap to
/// clone: callers get their own snapshot rather than a reference into the
/// shared cache.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedSession {
    pub session_id: String,
    pub message_parents: HashMap<String, Option<String>>,
    pub total_events: usize,
    pub active_events: usize,
    pub reverted_events: usize,
    pub last_event_id: Option<String>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    pub materialized_at: DateTime<Utc>,
    pub materialization_digest: String,
    pub is_stale: bool,
    pub drift_detected: bool,
}

impl MaterializedSession {
    pub fn empty(session_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            message_parents: HashMap::new(),
            total_events: 0,
            active_events: 0,
            reverted_events: 0,
            last_event_id: None,
            last_event_timestamp: None,
            materialized_at: now,
            materialization_digest: chronicle_events::session_digest(&std::collections::BTreeSet::new()),
            is_stale: false,
            drift_detected: false,
        }
    }
}
