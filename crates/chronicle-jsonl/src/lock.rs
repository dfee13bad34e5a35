use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::error::JsonlError;

/// Cooperative sibling-file lock. Held for the duration of a single JSONL
/// rewrite so that separate OS processes serialize writes to the same
/// session file; an in-process `Mutex` alone cannot do that.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquires `path` as a lock file, retrying until `timeout` elapses. A lock
/// file older than `stale_after` is treated as abandoned (its owner crashed
/// without cleaning up) and reclaimed. `stale_after == Duration::ZERO`
/// disables reclamation.
pub fn acquire_lock(
    path: &Path,
    timeout: Duration,
    stale_after: Duration,
) -> Result<LockGuard, JsonlError> {
    let start = SystemTime::now();

    loop {
        match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(mut file) => {
                let pid = std::process::id();
                let _ = writeln!(file, "{pid}");
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                });
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                if stale_after > Duration::ZERO && reclaim_stale_lock(path, stale_after) {
                    continue;
                }
                let elapsed = SystemTime::now().duration_since(start).unwrap_or_default();
                if elapsed >= timeout {
                    return Err(JsonlError::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(source) => {
                return Err(JsonlError::LockIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

fn reclaim_stale_lock(path: &Path, stale_after: Duration) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return false,
    };
    let modified = match metadata.modified() {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    let age = match SystemTime::now().duration_since(modified) {
        Ok(age) => age,
        Err(_) => return false,
    };
    if age >= stale_after {
        fs::remove_file(path).is_ok()
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("session.lock");
        {
            let _guard = acquire_lock(&lock_path, Duration::from_millis(200), Duration::ZERO)
                .expect("acquire");
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn times_out_when_lock_persists() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("session.lock");
        fs::write(&lock_path, "stale").unwrap();
        let error = acquire_lock(&lock_path, Duration::from_millis(150), Duration::ZERO)
            .expect_err("must time out");
        assert!(matches!(error, JsonlError::LockTimeout { .. }));
        fs::remove_file(&lock_path).unwrap();
    }

    #[test]
    fn reclaims_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("session.lock");
        fs::write(&lock_path, "stale").unwrap();
        let old = SystemTime::now() - Duration::from_secs(60);
        let file = fs::File::open(&lock_path).unwrap();
        file.set_modified(old).unwrap();
        let _guard = acquire_lock(&lock_path, Duration::from_millis(500), Duration::from_millis(10))
            .expect("reclaim stale lock and acquire");
    }
}
