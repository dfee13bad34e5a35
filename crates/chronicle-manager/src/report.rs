use std::collections::HashMap;

use chronicle_core::ParseDiagnostic;
use chronicle_events::DigestMismatch;
use serde::Serialize;

/// Output of [`crate::RepairManager::scan`]: everything `chronicle-dag` and
/// `chronicle-dedup` can tell us about a session without changing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub session_id: String,
    pub record_count: usize,
    pub orphan_uuids: Vec<String>,
    pub duplicate_tool_replies: usize,
    pub corruption_scores: HashMap<String, f64>,
    pub parse_diagnostics: Vec<ParseDiagnostic>,
}

/// Output of [`crate::RepairManager::verify_integrity`]. A rewrite-backed
/// session has no event log to check and always reports ok with zero
/// checked events; an event-store-backed session folds in both the event
/// digest check and the materializer's own cache-vs-replay comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyOutcome {
    pub session_id: String,
    pub checked_events: usize,
    pub digest_mismatches: Vec<DigestMismatch>,
    pub drift_detected: bool,
}

impl VerifyOutcome {
    pub fn is_ok(&self) -> bool {
        self.digest_mismatches.is_empty() && !self.drift_detected
    }
}
