use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::JsonlError;

/// A reference to an immutable, timestamped snapshot of a session file.
/// Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRef {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Copies `path`'s current bytes into `backup_dir` under a name keyed by
/// session and creation time. Returns `Ok(None)` if `path` does not yet
/// exist (nothing to back up).
pub fn create_backup(
    path: &Path,
    session_id: &str,
    backup_dir: &Path,
    created_at: DateTime<Utc>,
) -> Result<Option<BackupRef>, JsonlError> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(backup_dir).map_err(|source| JsonlError::Io {
        path: backup_dir.to_path_buf(),
        source,
    })?;
    let file_name = format!(
        "{session_id}.{}.jsonl.bak",
        created_at.format("%Y%m%dT%H%M%S%.f")
    );
    let backup_path = backup_dir.join(file_name);
    std::fs::copy(path, &backup_path).map_err(|source| JsonlError::Io {
        path: backup_path.clone(),
        source,
    })?;
    Ok(Some(BackupRef {
        session_id: session_id.to_string(),
        created_at,
        path: backup_path,
    }))
}

/// Lists backups for a session, most recent first. Backups are named
/// `{session_id}.{timestamp}.jsonl.bak`; any other file in the directory is
/// ignored.
pub fn list_backups(backup_dir: &Path, session_id: &str) -> Vec<BackupRef> {
    let Ok(entries) = std::fs::read_dir(backup_dir) else {
        return Vec::new();
    };
    let prefix = format!("{session_id}.");
    let mut backups: Vec<BackupRef> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            let rest = name.strip_prefix(&prefix)?;
            let timestamp_part = rest.strip_suffix(".jsonl.bak")?;
            let created_at =
                DateTime::parse_from_str(&format!("{timestamp_part}+0000"), "%Y%m%dT%H%M%S%.f%z")
                    .ok()?
                    .with_timezone(&Utc);
            Some(BackupRef {
                session_id: session_id.to_string(),
                created_at,
                path,
            })
        })
        .collect();
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    backups
}

pub fn restore_from_backup(backup: &BackupRef, target: &Path) -> Result<(), JsonlError> {
    let content = std::fs::read_to_string(&backup.path).map_err(|source| JsonlError::Io {
        path: backup.path.clone(),
        source,
    })?;
    crate::writer::write_atomic(target, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn create_backup_copies_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"{\"uuid\":\"a\"}\n")
            .unwrap();
        let backup_dir = dir.path().join("backups");
        let backup = create_backup(&path, "s", &backup_dir, Utc::now())
            .unwrap()
            .expect("backup created");
        assert_eq!(backup.session_id, "s");
        assert!(backup.path.exists());
    }

    #[test]
    fn create_backup_is_noop_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        let backup_dir = dir.path().join("backups");
        let backup = create_backup(&path, "s", &backup_dir, Utc::now()).unwrap();
        assert!(backup.is_none());
    }

    #[test]
    fn list_backups_sorts_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{\"uuid\":\"a\"}\n").unwrap();
        let backup_dir = dir.path().join("backups");
        let first = Utc::now() - chrono::Duration::seconds(10);
        let second = Utc::now();
        create_backup(&path, "s", &backup_dir, first).unwrap();
        create_backup(&path, "s", &backup_dir, second).unwrap();
        let backups = list_backups(&backup_dir, "s");
        assert_eq!(backups.len(), 2);
        assert!(backups[0].created_at >= backups[1].created_at);
    }
}
