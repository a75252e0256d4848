//! Shared generation counter used to invalidate in-flight work.
//!
//! The requester is the only writer; the worker only reads. Staleness is
//! binary: a request is live exactly while the counter still equals the
//! value stamped into it at submission time. Multiple bumps between two
//! reads coalesce - only the final value matters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing counter shared between the requester and the
/// generation worker.
///
/// Clones observe the same underlying cell. Both operations are lock-free;
/// the worker polls `read()` at each generation step boundary rather than
/// blocking on a notification.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    cell: Arc<AtomicU64>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter, invalidating every request stamped with an
    /// earlier epoch. Returns the new value.
    pub fn bump(&self) -> u64 {
        self.cell.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Read the current epoch.
    pub fn read(&self) -> u64 {
        self.cell.load(Ordering::SeqCst)
    }

    /// True when `epoch` is no longer the current epoch.
    pub fn is_stale(&self, epoch: u64) -> bool {
        self.read() != epoch
    }
}
