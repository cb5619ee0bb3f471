//! Cooperative cancellation token.
//!
//! The orchestrator checks it at node boundaries and between stream
//! events; signaling it stops LLM streaming, prevents new tool starts,
//! and produces a `cancelled` event with the partial content.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether two tokens share the same underlying flag (i.e. are
    /// clones of one another).
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}
