use std::path::Path;

use chronicle_core::{ParseDiagnostic, Record};

use crate::error::JsonlError;

/// Reads a JSONL session file sequentially, preserving line order.
/// Malformed lines never abort the load: they are collected as
/// diagnostics and skipped.
pub fn load(path: &Path) -> Result<(Vec<Record>, Vec<ParseDiagnostic>), JsonlError> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| JsonlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(load_str(&text))
}

/// Same as [`load`] but operating on an in-memory buffer, useful for tests
/// and for replaying backup contents without touching disk twice.
pub fn load_str(text: &str) -> (Vec<Record>, Vec<ParseDiagnostic>) {
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match Record::from_json_line(line) {
            Ok(record) => records.push(record),
            Err(error) => diagnostics.push(ParseDiagnostic {
                line_number: index + 1,
                message: error.to_string(),
            }),
        }
    }
    (records, diagnostics)
}
