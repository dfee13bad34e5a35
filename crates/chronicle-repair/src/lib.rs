//! Produces validated, ranked repair proposals for orphaned records. Never
//! mutates state: rejected candidates surface a typed reason instead of
//! being silently dropped.

use chronicle_core::Record;
use chronicle_dag::ConversationDag;
use chronicle_similarity::{rank_candidates, DEFAULT_MIN_SCORE, DEFAULT_TOP_K};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    ParentAfterTarget,
    WouldIntroduceCycle,
    BelowMinScore { score: f64, min_score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedCandidate {
    pub candidate_uuid: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOperation {
    pub target_uuid: String,
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub similarity_score: f64,
    pub reason: String,
    pub operator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalSet {
    pub target_uuid: String,
    pub accepted: Vec<RepairOperation>,
    pub rejected: Vec<RejectedCandidate>,
    pub no_valid_candidates: bool,
}

pub struct RepairPolicy {
    pub min_score: f64,
    pub top_k: usize,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Proposes 0..=top_k ranked [`RepairOperation`]s reattaching `orphan_uuid`
/// to a plausible parent. Does not persist anything; `chronicle-store` /
/// `chronicle-events` apply the winning operation.
pub fn propose(
    orphan_uuid: &str,
    records: &[Record],
    dag: &ConversationDag,
    operator: &str,
    policy: &RepairPolicy,
) -> ProposalSet {
    let empty = ProposalSet {
        target_uuid: orphan_uuid.to_string(),
        accepted: Vec::new(),
        rejected: Vec::new(),
        no_valid_candidates: true,
    };

    let Some(target) = records.iter().find(|record| record.uuid == orphan_uuid) else {
        return empty;
    };
    if !target.is_orphan {
        return empty;
    }

    let scored = rank_candidates(target, records, dag, policy.top_k);
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for candidate_score in &scored {
        let Some(candidate) = records.iter().find(|r| r.uuid == candidate_score.candidate_uuid) else {
            continue;
        };

        if candidate.timestamp > target.timestamp {
            rejected.push(RejectedCandidate {
                candidate_uuid: candidate.uuid.clone(),
                reason: RejectReason::ParentAfterTarget,
            });
            continue;
        }

        if dag.reaches(&candidate.uuid, &target.uuid) {
            rejected.push(RejectedCandidate {
                candidate_uuid: candidate.uuid.clone(),
                reason: RejectReason::WouldIntroduceCycle,
            });
            continue;
        }

        if candidate_score.score < policy.min_score {
            rejected.push(RejectedCandidate {
                candidate_uuid: candidate.uuid.clone(),
                reason: RejectReason::BelowMinScore {
                    score: candidate_score.score,
                    min_score: policy.min_score,
                },
            });
            continue;
        }

        accepted.push(RepairOperation {
            target_uuid: target.uuid.clone(),
            field: "parent_uuid".to_string(),
            old_value: target
                .parent_uuid
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            new_value: Value::String(candidate.uuid.clone()),
            similarity_score: candidate_score.score,
            reason: format!(
                "temporal={:.2} keyword={:.2} thread_affinity={:.2} role={:.2}",
                candidate_score.temporal,
                candidate_score.keyword,
                candidate_score.thread_affinity,
                candidate_score.role_compatibility
            ),
            operator: operator.to_string(),
        });
    }

    let no_valid_candidates = accepted.is_empty();
    ProposalSet {
        target_uuid: orphan_uuid.to_string(),
        accepted,
        rejected,
        no_valid_candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: &str, parent: Option<&str>, role: &str, text: &str, ts_secs: i64) -> Record {
        let parent_field = match parent {
            Some(p) => format!(r#""parentUuid":"{p}""#),
            None => r#""parentUuid":null"#.to_string(),
        };
        let line = format!(
            r#"{{"uuid":"{uuid}",{parent_field},"sessionId":"s","message":{{"role":"{role}","content":[{{"type":"text","text":"{text}"}}]}},"timestamp":"1970-01-01T00:{:02}:{:02}Z"}}"#,
            ts_secs / 60,
            ts_secs % 60,
        );
        Record::from_json_line(&line).unwrap()
    }

    #[test]
    fn proposes_ranked_operations_for_an_orphan() {
        let mut records = vec![
            record("a", None, "user", "please run the build", 0),
            record("b", Some("a"), "assistant", "running the build now", 1),
            record("c", Some("ghost"), "user", "build looks good", 2),
        ];
        let dag = ConversationDag::build(&mut records);
        let proposals = propose("c", &records, &dag, "tester", &RepairPolicy::default());
        assert!(!proposals.no_valid_candidates);
        assert_eq!(proposals.accepted[0].target_uuid, "c");
        assert_eq!(proposals.accepted[0].new_value, Value::String("b".to_string()));
    }

    #[test]
    fn non_orphan_target_yields_no_candidates() {
        let mut records = vec![record("a", None, "user", "hi", 0), record("b", Some("a"), "assistant", "hi back", 1)];
        let dag = ConversationDag::build(&mut records);
        let proposals = propose("b", &records, &dag, "tester", &RepairPolicy::default());
        assert!(proposals.no_valid_candidates);
    }

    #[test]
    fn rejects_candidates_below_min_score() {
        let mut records = vec![
            record("a", None, "user", "zzz", 0),
            record("c", Some("ghost"), "user", "qqq", 1),
        ];
        let dag = ConversationDag::build(&mut records);
        let strict = RepairPolicy { min_score: 0.99, top_k: DEFAULT_TOP_K };
        let proposals = propose("c", &records, &dag, "tester", &strict);
        assert!(proposals.no_valid_candidates);
        assert!(proposals
            .rejected
            .iter()
            .any(|r| matches!(r.reason, RejectReason::BelowMinScore { .. })));
    }
}
