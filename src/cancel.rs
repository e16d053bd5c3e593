//! Cooperative cancellation for suspending calls.
//!
//! A [`CancelToken`] is threaded through every operation that performs
//! provider or source I/O. Implementations check it between requests and
//! abort with a cancellation error; in-memory state (caches, TXT sets) is
//! left untouched so the next cycle starts fresh.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cheaply clonable cancellation flag shared between the owner (usually the
/// process signal handler) and all suspending calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Request cancellation. All clones of this token observe the change.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
