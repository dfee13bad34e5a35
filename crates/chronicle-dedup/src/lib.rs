//! Detects and removes duplicate `tool_result` blocks inside a single
//! record's content. Operates on the record's raw JSON blocks (not the
//! typed `ContentBlock` view) so malformed shapes can be categorized
//! instead of silently folded into `Other`.

use std::collections::HashSet;

use chronicle_core::Record;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_OVERSIZE_RECORD_BYTES: usize = 33_554_432;

/// A single block this far over the per-record bound is flagged on its
/// own even when the record as a whole is still under
/// `DEFAULT_OVERSIZE_RECORD_BYTES` — one outsized tool result shouldn't
/// have to wait for the rest of the record to pile up before an operator
/// sees it.
pub const DEFAULT_OVERSIZE_BLOCK_BYTES: usize = 1_048_576;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("record content is {bytes} bytes, exceeding the {limit} byte bound")]
    OversizeRecord { bytes: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupCategory {
    MissingId,
    Malformed,
    Oversized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupDiagnostic {
    pub index: usize,
    pub category: DedupCategory,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub kept: Vec<Value>,
    pub removed_count: usize,
    pub kept_first_indices: Vec<usize>,
    pub diagnostics: Vec<DedupDiagnostic>,
    pub structural_warning: bool,
}

/// Removes duplicate `tool_result` blocks (by `tool_use_id`) from `content`,
/// keeping the first occurrence of each id. Block order is otherwise
/// preserved. Pure function over the raw block array; does not touch a
/// `Record`.
pub fn dedupe(content: &[Value], oversize_bytes: usize) -> Result<DedupOutcome, DedupError> {
    if content.is_empty() {
        return Ok(DedupOutcome::default());
    }

    let approx_bytes: usize = content
        .iter()
        .map(|block| serde_json::to_string(block).map(|s| s.len()).unwrap_or(0))
        .sum();
    if approx_bytes > oversize_bytes {
        return Err(DedupError::OversizeRecord {
            bytes: approx_bytes,
            limit: oversize_bytes,
        });
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut outcome = DedupOutcome::default();

    for (index, block) in content.iter().enumerate() {
        let block_bytes = serde_json::to_string(block).map(|s| s.len()).unwrap_or(0);
        if block_bytes > DEFAULT_OVERSIZE_BLOCK_BYTES {
            outcome.diagnostics.push(DedupDiagnostic {
                index,
                category: DedupCategory::Oversized,
            });
            outcome.kept.push(block.clone());
            outcome.kept_first_indices.push(index);
            continue;
        }

        let Some(obj) = block.as_object() else {
            outcome.diagnostics.push(DedupDiagnostic {
                index,
                category: DedupCategory::Malformed,
            });
            outcome.kept.push(block.clone());
            outcome.kept_first_indices.push(index);
            continue;
        };

        if obj.get("type").and_then(Value::as_str) != Some("tool_result") {
            outcome.kept.push(block.clone());
            outcome.kept_first_indices.push(index);
            continue;
        }

        match obj.get("tool_use_id").and_then(Value::as_str) {
            None => {
                outcome.diagnostics.push(DedupDiagnostic {
                    index,
                    category: DedupCategory::MissingId,
                });
                outcome.kept.push(block.clone());
                outcome.kept_first_indices.push(index);
            }
            Some(id) => {
                if seen_ids.insert(id.to_string()) {
                    outcome.kept.push(block.clone());
                    outcome.kept_first_indices.push(index);
                } else {
                    outcome.removed_count += 1;
                }
            }
        }
    }

    Ok(outcome)
}

/// Dedupes `record`'s content in place and returns the outcome. A record
/// whose content field is absent or not a JSON array is a no-op with
/// `structural_warning` set, per the non-list-content edge policy.
pub fn dedupe_record(record: &mut Record, oversize_bytes: usize) -> Result<DedupOutcome, DedupError> {
    let Some(content) = record.content_values() else {
        return Ok(DedupOutcome {
            structural_warning: true,
            ..DedupOutcome::default()
        });
    };

    let outcome = dedupe(&content, oversize_bytes)?;
    if outcome.removed_count > 0 {
        record.set_content_values(outcome.kept.clone());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_duplicate_tool_result_keeping_first() {
        let content = vec![
            json!({"type": "text", "text": "a"}),
            json!({"type": "tool_result", "tool_use_id": "x", "output": "1"}),
            json!({"type": "tool_result", "tool_use_id": "x", "output": "2"}),
            json!({"type": "text", "text": "b"}),
            json!({"type": "tool_result", "tool_use_id": "y", "output": "3"}),
        ];
        let outcome = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert_eq!(outcome.removed_count, 1);
        assert_eq!(outcome.kept_first_indices, vec![0, 1, 3, 4]);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let content = vec![
            json!({"type": "tool_result", "tool_use_id": "x", "output": "1"}),
            json!({"type": "tool_result", "tool_use_id": "x", "output": "2"}),
        ];
        let first = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        let second = dedupe(&first.kept, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert_eq!(second.removed_count, 0);
        assert_eq!(second.kept, first.kept);
    }

    #[test]
    fn empty_content_is_a_no_op() {
        let outcome = dedupe(&[], DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert_eq!(outcome, DedupOutcome::default());
    }

    #[test]
    fn missing_tool_use_id_is_categorized_and_kept() {
        let content = vec![json!({"type": "tool_result", "output": "1"})];
        let outcome = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.diagnostics[0].category, DedupCategory::MissingId);
    }

    #[test]
    fn a_single_oversized_block_is_categorized_and_kept_without_aborting() {
        let huge_output = "x".repeat(DEFAULT_OVERSIZE_BLOCK_BYTES + 1);
        let content = vec![json!({"type": "tool_result", "tool_use_id": "x", "output": huge_output})];
        let outcome = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.diagnostics[0].category, DedupCategory::Oversized);
    }

    #[test]
    fn malformed_block_is_categorized_and_kept() {
        let content = vec![Value::String("not an object".to_string())];
        let outcome = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.diagnostics[0].category, DedupCategory::Malformed);
    }

    #[test]
    fn oversize_content_aborts() {
        let big = "x".repeat(100);
        let content: Vec<Value> = (0..10).map(|i| json!({"type": "text", "text": format!("{big}{i}")})).collect();
        let error = dedupe(&content, 50).unwrap_err();
        assert!(matches!(error, DedupError::OversizeRecord { .. }));
    }

    #[test]
    fn record_with_non_array_content_sets_structural_warning() {
        let mut record = Record::from_json_line(r#"{"uuid":"a","message":{"role":"user","content":"oops"}}"#).unwrap();
        let outcome = dedupe_record(&mut record, DEFAULT_OVERSIZE_RECORD_BYTES).unwrap();
        assert!(outcome.structural_warning);
    }
}
