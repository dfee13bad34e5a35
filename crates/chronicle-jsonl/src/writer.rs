use std::path::Path;

use chrono::Utc;
use chronicle_core::Record;

use crate::backup::{self, BackupRef};
use crate::error::JsonlError;

/// Renders records back to JSONL bytes, one `to_json_line()` per line
/// joined by `\n` with a single trailing `\n` (absent for an empty session).
pub fn render(records: &[Record]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let mut content = records
        .iter()
        .map(Record::to_json_line)
        .collect::<Vec<_>>()
        .join("\n");
    content.push('\n');
    content
}

/// Writes `content` to `path` via temp file + rename so readers never
/// observe a partial write.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<(), JsonlError> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir).map_err(|source| JsonlError::Io {
        path: parent_dir.to_path_buf(),
        source,
    })?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("session"),
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let temp_path = parent_dir.join(temp_name);
    let mut file = std::fs::File::create(&temp_path).map_err(|source| JsonlError::Io {
        path: temp_path.clone(),
        source,
    })?;
    use std::io::Write as _;
    file.write_all(content.as_bytes())
        .map_err(|source| JsonlError::Io {
            path: temp_path.clone(),
            source,
        })?;
    file.sync_all().map_err(|source| JsonlError::Io {
        path: temp_path.clone(),
        source,
    })?;
    std::fs::rename(&temp_path, path).map_err(|source| JsonlError::AtomicSwap {
        temp: temp_path.clone(),
        target: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn validate(path: &Path, expected_lines: usize) -> Result<(), JsonlError> {
    let content = std::fs::read_to_string(path).map_err(|source| JsonlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let found = content.lines().filter(|line| !line.trim().is_empty()).count();
    if found != expected_lines {
        return Err(JsonlError::Validation {
            path: path.to_path_buf(),
            expected: expected_lines,
            found,
        });
    }
    Ok(())
}

/// Atomically replaces `path` with `records`. If `backup_dir` is given, a
/// snapshot of `path`'s pre-save contents is taken first; on post-rename
/// validation failure that snapshot is used to restore `path` before the
/// error is returned, so the target file is never left in a partially
/// written or wrong-length state.
pub fn save(
    path: &Path,
    session_id: &str,
    records: &[Record],
    backup_dir: Option<&Path>,
) -> Result<Option<BackupRef>, JsonlError> {
    let backup_ref = match backup_dir {
        Some(dir) => backup::create_backup(path, session_id, dir, Utc::now())?,
        None => None,
    };

    let content = render(records);
    write_atomic(path, &content)?;

    if let Err(validation_error) = validate(path, records.len()) {
        tracing::error!(path = %path.display(), "jsonl save validation failed, attempting rollback");
        if let Some(backup_ref) = &backup_ref {
            backup::restore_from_backup(backup_ref, path)?;
        }
        return Err(validation_error);
    }

    Ok(backup_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::Record;

    fn record(uuid: &str) -> Record {
        Record::from_json_line(&format!("{{\"uuid\":\"{uuid}\"}}")).unwrap()
    }

    #[test]
    fn save_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let records = vec![record("a"), record("b")];
        save(&path, "s", &records, None).unwrap();
        let (loaded, diagnostics) = crate::reader::load(&path).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn save_creates_backup_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let backup_dir = dir.path().join("backups");
        save(&path, "s", &[record("a")], Some(&backup_dir))
            .unwrap()
            .map_or((), |_| ());
        let backup_ref = save(&path, "s", &[record("a"), record("b")], Some(&backup_dir))
            .unwrap()
            .expect("backup of prior content");
        assert!(backup_ref.path.exists());
    }

    #[test]
    fn empty_session_renders_empty_file() {
        assert_eq!(render(&[]), "");
    }
}
