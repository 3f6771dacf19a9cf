//! Request epoch for stale-request cancellation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter identifying the newest lifecycle request.
///
/// A start sequence captures [`current()`](Self::current) as its request id.
/// Anything that invalidates in-flight work calls [`bump()`](Self::bump). After
/// every suspension point the sequence asks [`is_stale()`](Self::is_stale) and
/// unwinds if a newer request has arrived.
#[derive(Debug, Default)]
pub struct RequestEpoch {
    value: AtomicU64,
}

impl RequestEpoch {
    /// Creates an epoch starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current request id.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Invalidates every outstanding request id and returns the new one.
    pub fn bump(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns `true` if `id` is no longer the newest request.
    pub fn is_stale(&self, id: u64) -> bool {
        id != self.current()
    }
}
