//! Cooperative cancellation for tile jobs.
//!
//! Workers never suspend inside arithmetic; they look at the token at
//! row boundaries. Cancellation is advisory: a job that completes during
//! the race is honored and its tile still caches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rows rendered between cancellation checks.
pub const ROWS_PER_CHECK: u32 = 16;

/// Shared cancel flag, one per dispatched job.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let seen_by_worker = token.clone();
        token.cancel();
        assert!(seen_by_worker.is_cancelled());
    }
}
