use chronicle_dag::{ConversationDag, ThreadTag};
use chronicle_manager::ScanReport;
use chronicle_repair::ProposalSet;
use chronicle_store::AppliedRepair;
use serde::Serialize;

/// Renders a value either as pretty JSON (`--json`) or as the human
/// text the corresponding `to_text` impl produces — mirroring the
/// source's doctor/audit commands, which support both an operator
/// console view and a machine-readable one behind the same flag.
pub fn emit<T: Serialize>(value: &T, text: impl FnOnce() -> String, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(value).expect("serializable"));
    } else {
        println!("{}", text());
    }
}

#[derive(Debug, Serialize)]
pub struct ScanReportView<'a> {
    pub session_id: &'a str,
    pub record_count: usize,
    pub orphan_count: usize,
    pub orphan_uuids: &'a [String],
    pub duplicate_tool_replies: usize,
    pub parse_diagnostics: usize,
}

impl<'a> From<&'a ScanReport> for ScanReportView<'a> {
    fn from(report: &'a ScanReport) -> Self {
        Self {
            session_id: &report.session_id,
            record_count: report.record_count,
            orphan_count: report.orphan_uuids.len(),
            orphan_uuids: &report.orphan_uuids,
            duplicate_tool_replies: report.duplicate_tool_replies,
            parse_diagnostics: report.parse_diagnostics.len(),
        }
    }
}

pub fn scan_report_text(report: &ScanReport) -> String {
    let mut out = format!(
        "session {}: {} records, {} orphans, {} duplicate tool replies, {} parse diagnostics\n",
        report.session_id,
        report.record_count,
        report.orphan_uuids.len(),
        report.duplicate_tool_replies,
        report.parse_diagnostics.len(),
    );
    for uuid in &report.orphan_uuids {
        let score = report.corruption_scores.get(uuid).copied().unwrap_or(0.0);
        out.push_str(&format!("  orphan {uuid} corruption_score={score:.2}\n"));
    }
    out.trim_end().to_string()
}

pub fn proposal_sets_text(proposals: &[ProposalSet]) -> String {
    if proposals.is_empty() {
        return "no orphans to propose fixes for".to_string();
    }
    let mut out = String::new();
    for set in proposals {
        if set.no_valid_candidates {
            out.push_str(&format!("{}: no_valid_candidates\n", set.target_uuid));
            continue;
        }
        out.push_str(&format!("{}:\n", set.target_uuid));
        for (rank, op) in set.accepted.iter().enumerate() {
            out.push_str(&format!(
                "  #{} -> {} score={:.3} ({})\n",
                rank + 1,
                op.new_value,
                op.similarity_score,
                op.reason
            ));
        }
    }
    out.trim_end().to_string()
}

pub fn applied_repair_text(applied: &AppliedRepair) -> String {
    format!(
        "applied: before={} after={} event_id={} backup={}",
        applied.before,
        applied.after,
        applied.event_id.as_deref().unwrap_or("-"),
        applied.backup_ref.as_ref().map(|b| b.path.display().to_string()).unwrap_or_else(|| "-".to_string()),
    )
}

pub fn history_text(history: &[AppliedRepair]) -> String {
    if history.is_empty() {
        return "no history".to_string();
    }
    history.iter().map(applied_repair_text).collect::<Vec<_>>().join("\n")
}

#[derive(Debug, Serialize)]
pub struct DagView {
    pub roots: Vec<String>,
    pub branch_tips: Vec<String>,
    pub main_thread_len: usize,
    pub side_thread_count: usize,
    pub orphaned_thread_count: usize,
}

impl From<&ConversationDag> for DagView {
    fn from(dag: &ConversationDag) -> Self {
        let main_thread_len = dag
            .threads
            .iter()
            .find(|thread| thread.tag == ThreadTag::Main)
            .map(|thread| thread.members.len())
            .unwrap_or(0);
        let side_thread_count = dag.threads.iter().filter(|thread| thread.tag == ThreadTag::Side).count();
        let orphaned_thread_count = dag.threads.iter().filter(|thread| thread.tag == ThreadTag::Orphaned).count();
        Self {
            roots: dag.roots.clone(),
            branch_tips: dag.branch_tips(),
            main_thread_len,
            side_thread_count,
            orphaned_thread_count,
        }
    }
}

pub fn dag_text(dag: &ConversationDag) -> String {
    let view = DagView::from(dag);
    format!(
        "roots: {}\nbranch tips: {}\nmain thread: {} records\nside threads: {}\norphaned threads: {}",
        view.roots.join(", "),
        view.branch_tips.join(", "),
        view.main_thread_len,
        view.side_thread_count,
        view.orphaned_thread_count,
    )
}
