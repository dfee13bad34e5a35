use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonlError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("atomic rename from {temp} to {target} failed: {source}")]
    AtomicSwap {
        temp: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("validation after save of {path} failed: expected {expected} lines, found {found}")]
    Validation {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("timed out acquiring lock {path}")]
    LockTimeout { path: PathBuf },
    #[error("failed to acquire lock {path}: {source}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
