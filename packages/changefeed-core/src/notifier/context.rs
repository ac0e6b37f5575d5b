//! Owning-side identity and handle.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the thread or event loop that owns a collection.
///
/// Handed out explicitly instead of being read from the running thread, so
/// ownership checks also work for executors that hop between OS threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContext(u64);

impl ExecutionContext {
    /// Allocates a context distinct from every other one in the process.
    pub fn new() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The collection a worker reports to, as seen from the worker.
pub trait CollectionHandle: Send + Sync {
    /// Context the collection lives on.
    fn context(&self) -> ExecutionContext;

    /// Called when the first callback is added to a worker that had none,
    /// so the owner can schedule a notification pass.
    fn request_notifications(&self) {}
}
