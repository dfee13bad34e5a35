use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancel flag threaded through long operations. Checked at
/// suspension-point boundaries only (before acquiring a session lock and
/// before the one mutating call an operation makes); never interrupts a
/// write already in flight, so a cancelled `apply` either never touched
/// the backend or has already committed whole.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
