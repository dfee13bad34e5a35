//! Property test for spec.md §8's "idempotence of dedup" invariant:
//! `dedupe(dedupe(r)) == dedupe(r)` for arbitrary content arrays.

use chronicle_dedup::{dedupe, DEFAULT_OVERSIZE_RECORD_BYTES};
use proptest::prelude::*;
use serde_json::{json, Value};

fn tool_result_block(id: &str, output: &str) -> Value {
    json!({ "type": "tool_result", "tool_use_id": id, "output": output })
}

fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

/// A content array mixing duplicate-prone tool results with plain text,
/// drawn from a small alphabet of ids so duplicates actually occur.
fn content_strategy() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(
        prop_oneof![
            ("a|b|c|d", any::<u8>()).prop_map(|(id, output)| tool_result_block(id, &output.to_string())),
            "[a-z]{0,8}".prop_map(|text| text_block(&text)),
        ],
        0..24,
    )
}

proptest! {
    #[test]
    fn dedupe_is_idempotent(content in content_strategy()) {
        let first = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).expect("within size bound");
        let second = dedupe(&first.kept, DEFAULT_OVERSIZE_RECORD_BYTES).expect("within size bound");
        prop_assert_eq!(second.kept, first.kept);
        prop_assert_eq!(second.removed_count, 0);
    }

    #[test]
    fn every_block_is_either_kept_or_counted_as_removed(content in content_strategy()) {
        let outcome = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).expect("within size bound");
        prop_assert!(outcome.kept.len() <= content.len());
        prop_assert_eq!(outcome.kept.len() + outcome.removed_count, content.len());
    }

    #[test]
    fn every_kept_tool_result_id_is_unique(content in content_strategy()) {
        let outcome = dedupe(&content, DEFAULT_OVERSIZE_RECORD_BYTES).expect("within size bound");
        let mut seen = std::collections::HashSet::new();
        for block in &outcome.kept {
            if let Some(id) = block.get("type").and_then(Value::as_str).filter(|t| *t == "tool_result")
                .and_then(|_| block.get("tool_use_id")).and_then(Value::as_str)
            {
                prop_assert!(seen.insert(id.to_string()), "duplicate tool_use_id survived dedupe: {id}");
            }
        }
    }
}
