use std::sync::atomic::{AtomicI64, Ordering};

/// The `lastSync` watermark. It only moves forward.
#[derive(Debug, Default)]
pub struct SyncCursor(AtomicI64);

impl SyncCursor {
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start.max(0)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move to `to` unless the cursor is already past it. Returns the
    /// cursor after the call.
    pub fn advance(&self, to: i64) -> i64 {
        let prev = self.0.fetch_max(to, Ordering::AcqRel);
        prev.max(to)
    }
}
