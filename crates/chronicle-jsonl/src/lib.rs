//! Line-oriented load/save of conversation session files: atomic replace,
//! post-write validation with rollback, timestamped backups, and a
//! cooperative sibling-file lock for cross-process writers.

mod backup;
mod error;
mod lock;
mod reader;
mod writer;

pub use backup::{create_backup, list_backups, restore_from_backup, BackupRef};
pub use error::JsonlError;
pub use lock::{acquire_lock, LockGuard};
pub use reader::{load, load_str};
pub use writer::{render, save};
