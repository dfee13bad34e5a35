//! Heuristic scoring of (orphan, candidate-parent) pairs: a deterministic,
//! weighted composite of temporal proximity, keyword overlap, thread
//! affinity, and role alternation.

use std::collections::HashSet;

use chronicle_core::Record;
use chronicle_dag::{ConversationDag, ThreadTag};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MIN_SCORE: f64 = 0.15;

const WEIGHT_TEMPORAL: f64 = 0.35;
const WEIGHT_KEYWORD: f64 = 0.40;
const WEIGHT_THREAD_AFFINITY: f64 = 0.15;
const WEIGHT_ROLE: f64 = 0.10;
const MIN_GAP_FLOOR_MS: i64 = 60_000;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "to", "of", "in", "on", "and", "or", "but",
    "for", "with", "at", "by", "from", "as", "it", "this", "that", "be", "been",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate_uuid: String,
    pub score: f64,
    pub temporal: f64,
    pub keyword: f64,
    pub thread_affinity: f64,
    pub role_compatibility: f64,
}

/// Scores up to `top_k` candidate parents for `orphan` among `records` in
/// the same session, deterministically ordered by score descending, tied
/// by smaller time gap then earlier uuid.
pub fn rank_candidates(
    orphan: &Record,
    records: &[Record],
    dag: &ConversationDag,
    top_k: usize,
) -> Vec<ScoredCandidate> {
    let mut preceding: Vec<&Record> = records
        .iter()
        .filter(|candidate| {
            candidate.session_id == orphan.session_id
                && candidate.uuid != orphan.uuid
                && candidate.timestamp <= orphan.timestamp
        })
        .collect();
    preceding.sort_by(|a, b| {
        let gap_a = orphan.timestamp - a.timestamp;
        let gap_b = orphan.timestamp - b.timestamp;
        gap_a.cmp(&gap_b).then_with(|| a.uuid.cmp(&b.uuid))
    });
    preceding.truncate(top_k);

    let gap_max = session_gap_p95(records).max(MIN_GAP_FLOOR_MS);
    let ancestor_side_root = closest_existing_ancestor(orphan, records)
        .and_then(|ancestor| dag.thread_of(&ancestor.uuid))
        .filter(|thread| thread.tag == ThreadTag::Side)
        .map(|thread| thread.root.as_str());

    let mut scored: Vec<ScoredCandidate> = preceding
        .iter()
        .map(|candidate| score_pair(orphan, candidate, dag, gap_max, ancestor_side_root))
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate_uuid.cmp(&b.candidate_uuid))
    });
    scored
}

/// The nearest record, by timestamp, that precedes `orphan` in the same
/// session and is itself not orphaned — i.e. the closest record whose own
/// ancestry is intact. An orphan's declared parent is by definition missing
/// from the record set, so there's no parent-chain walk to perform; this is
/// the closest thing to "where `orphan` hangs off the graph" that the
/// available data supports.
fn closest_existing_ancestor<'a>(orphan: &Record, records: &'a [Record]) -> Option<&'a Record> {
    records
        .iter()
        .filter(|candidate| {
            candidate.session_id == orphan.session_id
                && candidate.uuid != orphan.uuid
                && !candidate.is_orphan
                && candidate.timestamp <= orphan.timestamp
        })
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.uuid.cmp(&b.uuid)))
}

fn score_pair(
    orphan: &Record,
    candidate: &Record,
    dag: &ConversationDag,
    gap_max_ms: i64,
    ancestor_side_root: Option<&str>,
) -> ScoredCandidate {
    let delta_ms = (orphan.timestamp - candidate.timestamp).num_milliseconds();
    let temporal = if delta_ms < 0 {
        0.0
    } else {
        (1.0 - (delta_ms as f64 / gap_max_ms as f64)).max(0.0)
    };

    let keyword = jaccard(
        candidate.last_text_block().unwrap_or_default(),
        orphan.first_text_block().unwrap_or_default(),
    );

    let thread_affinity = match dag.thread_of(&candidate.uuid) {
        Some(thread) if thread.tag == ThreadTag::Main => 1.0,
        Some(thread) if thread.tag == ThreadTag::Side && Some(thread.root.as_str()) == ancestor_side_root => 0.5,
        _ => 0.0,
    };

    let role_compatibility = match (candidate.role, orphan.role) {
        (Some(a), Some(b)) if a != b => 1.0,
        _ => 0.0,
    };

    let score = (WEIGHT_TEMPORAL * temporal
        + WEIGHT_KEYWORD * keyword
        + WEIGHT_THREAD_AFFINITY * thread_affinity
        + WEIGHT_ROLE * role_compatibility)
        .clamp(0.0, 1.0);

    ScoredCandidate {
        candidate_uuid: candidate.uuid.clone(),
        score,
        temporal,
        keyword,
        thread_affinity,
        role_compatibility,
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|token| token.to_lowercase())
        .filter(|token| !token.is_empty() && !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn session_gap_p95(records: &[Record]) -> i64 {
    let mut timestamps: Vec<_> = records.iter().map(|record| record.timestamp).collect();
    timestamps.sort();
    let mut gaps: Vec<i64> = timestamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds())
        .filter(|gap| *gap >= 0)
        .collect();
    if gaps.is_empty() {
        return MIN_GAP_FLOOR_MS;
    }
    gaps.sort_unstable();
    let index = ((gaps.len() as f64) * 0.95).ceil() as usize;
    let index = index.saturating_sub(1).min(gaps.len() - 1);
    gaps[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: &str, role: &str, text: &str, ts_secs: i64) -> Record {
        let line = format!(
            r#"{{"uuid":"{uuid}","sessionId":"s","message":{{"role":"{role}","content":[{{"type":"text","text":"{text}"}}]}},"timestamp":"1970-01-01T00:{:02}:{:02}Z"}}"#,
            ts_secs / 60,
            ts_secs % 60,
        );
        Record::from_json_line(&line).unwrap()
    }

    #[test]
    fn ranks_candidates_deterministically() {
        let mut records = vec![
            record("a", "user", "please run the build", 0),
            record("b", "assistant", "running the build now", 10),
            record("c", "assistant", "build complete", 20),
        ];
        let orphan = record("ghost-child", "user", "build looks good", 25);
        let dag = ConversationDag::build(&mut records);

        let first = rank_candidates(&orphan, &records, &dag, DEFAULT_TOP_K);
        let second = rank_candidates(&orphan, &records, &dag, DEFAULT_TOP_K);
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert_eq!(first[0].candidate_uuid, "c");
    }

    #[test]
    fn disqualifies_candidates_after_the_orphan() {
        let mut records = vec![record("a", "user", "hi", 0), record("b", "assistant", "hi back", 100)];
        let orphan = record("ghost", "user", "hi", 50);
        let dag = ConversationDag::build(&mut records);
        let scored = rank_candidates(&orphan, &records, &dag, DEFAULT_TOP_K);
        assert!(scored.iter().all(|candidate| candidate.candidate_uuid != "b"));
    }

    #[test]
    fn thread_affinity_only_credits_the_orphans_own_side_thread() {
        let mut records = vec![
            record("a", "user", "root", 0),
            record("b", "assistant", "main reply", 10),
            record("c", "user", "main followup", 20),
            record("f", "user", "unrelated branch root", 1),
            record("g", "assistant", "unrelated branch reply", 11),
            record("h", "user", "orphan's branch root", 2),
            record("i", "assistant", "orphan's branch reply", 12),
        ];
        let dag = ConversationDag::build(&mut records);
        let orphan = record("ghost-child", "user", "orphan", 15);

        let scored = rank_candidates(&orphan, &records, &dag, DEFAULT_TOP_K);
        let affinity_of = |uuid: &str| {
            scored
                .iter()
                .find(|candidate| candidate.candidate_uuid == uuid)
                .map(|candidate| candidate.thread_affinity)
        };

        assert_eq!(affinity_of("i"), Some(0.5));
        assert_eq!(affinity_of("g"), Some(0.0));
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        assert_eq!(jaccard("apples and oranges", "xyz"), 0.0);
    }

    #[test]
    fn jaccard_of_empty_strings_is_zero() {
        assert_eq!(jaccard("", ""), 0.0);
    }
}
