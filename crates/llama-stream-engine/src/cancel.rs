use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide, idempotent cancellation signal.
///
/// Clones share the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that actually set it.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
