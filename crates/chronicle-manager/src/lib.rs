//! The orchestration surface used by a UI or CLI: load, detect, propose,
//! apply, materialize, behind one `RepairManager` entry point. Fixes a
//! single persistence backend per manager so a session's audit trail
//! never mixes an in-place rewrite with an immutable event append.

mod backend;
mod cancellation;
mod error;
mod manager;
mod report;

pub use backend::Backend;
pub use cancellation::CancellationToken;
pub use error::ManagerError;
pub use manager::RepairManager;
pub use report::{ScanReport, VerifyOutcome};
