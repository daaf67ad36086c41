//! Cancellation plumbing between the front end and the engine's poll loop.
//!
//! The front end (e.g. a Ctrl-C handler) owns a clone of the `CancelToken`
//! and trips it; only the engine's control thread samples it. Workers never
//! look at this token: they stop through the engine's own halt flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, clonable interrupt request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Cooperative stop signal the engine hands to its workers.
///
/// Polled at chunk boundaries, between attempts, and from the transfer
/// progress callback.
#[derive(Debug, Clone, Default)]
pub(crate) struct HaltFlag {
    flag: Arc<AtomicBool>,
}

impl HaltFlag {
    pub(crate) fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn halt_flag_starts_lowered() {
        let halt = HaltFlag::default();
        let other = halt.clone();
        assert!(!other.is_raised());
        halt.raise();
        assert!(other.is_raised());
    }
}
