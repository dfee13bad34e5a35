use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chronicle_core::Record;
use chronicle_dag::ConversationDag;
use chronicle_dedup::DEFAULT_OVERSIZE_RECORD_BYTES;
use chronicle_repair::{propose, ProposalSet, RepairOperation, RepairPolicy};
use chronicle_store::AppliedRepair;

use crate::backend::Backend;
use crate::cancellation::CancellationToken;
use crate::error::ManagerError;
use crate::report::{ScanReport, VerifyOutcome};

/// Orchestrates the full pipeline — load, detect, propose, apply,
/// materialize — behind one entry point. Exactly one repair may be
/// in-flight per session; a per-session lock serializes `apply`/`undo`/
/// `apply_dedupe` calls while leaving unrelated sessions free to proceed
/// concurrently.
pub struct RepairManager {
    session_dir: PathBuf,
    backend: Backend,
    policy: RepairPolicy,
    oversize_record_bytes: usize,
    operator_id: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepairManager {
    pub fn new(session_dir: impl Into<PathBuf>, backend: Backend, operator_id: impl Into<String>) -> Self {
        Self {
            session_dir: session_dir.into(),
            backend,
            policy: RepairPolicy::default(),
            oversize_record_bytes: DEFAULT_OVERSIZE_RECORD_BYTES,
            operator_id: operator_id.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_oversize_record_bytes(mut self, bytes: usize) -> Self {
        self.oversize_record_bytes = bytes;
        self
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(format!("{session_id}.jsonl"))
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Loads a session's records and builds its DAG, applying the
    /// materialized parent map on top when the event-store backend is
    /// active (direct JSONL parents otherwise).
    fn load_view(&self, session_id: &str) -> Result<(Vec<Record>, ConversationDag, Vec<chronicle_core::ParseDiagnostic>), ManagerError> {
        let (mut records, diagnostics) = chronicle_jsonl::load(&self.session_path(session_id))?;

        if let (Some(store), Some(materializer)) = (self.backend.event_store(), self.backend.materializer()) {
            let materialized = materializer.materialize(store, session_id)?;
            for record in records.iter_mut() {
                if let Some(parent) = materialized.message_parents.get(&record.uuid) {
                    record.set_parent_uuid(parent.clone());
                }
            }
        }

        let dag = ConversationDag::build(&mut records);
        Ok((records, dag, diagnostics))
    }

    /// Reports orphans, duplicate tool-reply blocks, and per-record
    /// corruption scores without changing anything on disk.
    pub fn scan(&self, session_id: &str) -> Result<ScanReport, ManagerError> {
        let (records, _dag, diagnostics) = self.load_view(session_id)?;

        let mut duplicate_tool_replies = 0;
        for record in &records {
            if let Some(content) = record.content_values() {
                if let Ok(outcome) = chronicle_dedup::dedupe(&content, self.oversize_record_bytes) {
                    duplicate_tool_replies += outcome.removed_count;
                }
            }
        }

        let orphan_uuids = records.iter().filter(|r| r.is_orphan).map(|r| r.uuid.clone()).collect();
        let corruption_scores = records.iter().map(|r| (r.uuid.clone(), r.corruption_score)).collect();

        Ok(ScanReport {
            session_id: session_id.to_string(),
            record_count: records.len(),
            orphan_uuids,
            duplicate_tool_replies,
            corruption_scores,
            parse_diagnostics: diagnostics,
        })
    }

    /// Ranked repair proposals for every orphan in the session, in the
    /// order they appear in the file — deterministic given the same
    /// input records and policy.
    pub fn propose_fixes(&self, session_id: &str) -> Result<Vec<ProposalSet>, ManagerError> {
        let (records, dag, _diagnostics) = self.load_view(session_id)?;
        let proposals = records
            .iter()
            .filter(|record| record.is_orphan)
            .map(|record| propose(&record.uuid, &records, &dag, &self.operator_id, &self.policy))
            .collect();
        Ok(proposals)
    }

    /// Applies a single accepted repair operation through the active
    /// persistence backend, serialized by this session's lock. A
    /// cancelled token checked before the lock and before the mutating
    /// call never leaves a partial write: the backend call itself either
    /// fully succeeds or fully fails.
    pub fn apply(&self, session_id: &str, op: &RepairOperation, token: &CancellationToken) -> Result<AppliedRepair, ManagerError> {
        if token.is_cancelled() {
            return Err(ManagerError::Cancelled(session_id.to_string()));
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        if token.is_cancelled() {
            return Err(ManagerError::Cancelled(session_id.to_string()));
        }
        Ok(self.backend.apply(session_id, op, &self.operator_id)?)
    }

    /// Undoes the most recently applied repair for a session, whichever
    /// backend holds its history.
    pub fn undo(&self, session_id: &str, token: &CancellationToken) -> Result<AppliedRepair, ManagerError> {
        if token.is_cancelled() {
            return Err(ManagerError::Cancelled(session_id.to_string()));
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        if token.is_cancelled() {
            return Err(ManagerError::Cancelled(session_id.to_string()));
        }
        Ok(self.backend.undo_last(session_id)?)
    }

    /// Removes duplicate tool-reply blocks from every record in a
    /// session's JSONL file and rewrites it atomically with a backup.
    /// Content edits have no representation in the parent-only event
    /// schema, so this always goes straight to the file regardless of
    /// which persistence backend is active for parent repairs.
    pub fn apply_dedupe(&self, session_id: &str, backup_dir: &Path, token: &CancellationToken) -> Result<usize, ManagerError> {
        if token.is_cancelled() {
            return Err(ManagerError::Cancelled(session_id.to_string()));
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().expect("session lock poisoned");
        if token.is_cancelled() {
            return Err(ManagerError::Cancelled(session_id.to_string()));
        }

        let path = self.session_path(session_id);
        let (mut records, _diagnostics) = chronicle_jsonl::load(&path)?;
        let mut removed_total = 0;
        for record in records.iter_mut() {
            let outcome = chronicle_dedup::dedupe_record(record, self.oversize_record_bytes)?;
            removed_total += outcome.removed_count;
        }
        if removed_total > 0 {
            chronicle_jsonl::save(&path, session_id, &records, Some(backup_dir))?;
        }
        Ok(removed_total)
    }

    /// The current conversation view: the materialized parent map folded
    /// onto the JSONL content when event-sourced, or a direct load
    /// otherwise.
    pub fn current_view(&self, session_id: &str) -> Result<ConversationDag, ManagerError> {
        let (_records, dag, _diagnostics) = self.load_view(session_id)?;
        Ok(dag)
    }

    pub fn history(&self, session_id: &str) -> Vec<AppliedRepair> {
        self.backend.history(session_id)
    }

    /// Digest and cache-drift check. A rewrite-backed session has no
    /// event log to verify and always reports ok; an event-sourced one
    /// recomputes every event digest and asks the materializer to
    /// compare its cache against a fresh replay.
    pub fn verify_integrity(&self, session_id: &str) -> Result<VerifyOutcome, ManagerError> {
        let (Some(store), Some(materializer)) = (self.backend.event_store(), self.backend.materializer()) else {
            return Ok(VerifyOutcome {
                session_id: session_id.to_string(),
                checked_events: 0,
                digest_mismatches: Vec::new(),
                drift_detected: false,
            });
        };

        let report = chronicle_events::verify(store, session_id)?;
        let fresh = materializer.validate(store, session_id)?;

        Ok(VerifyOutcome {
            session_id: session_id.to_string(),
            checked_events: report.checked_events,
            digest_mismatches: report.digest_mismatches,
            drift_detected: !fresh,
        })
    }
}
