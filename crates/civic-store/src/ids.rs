use std::sync::atomic::{AtomicI64, Ordering};

use civic_core::ids::notification_id;
use civic_core::record::{CollectionKind, Record, RecordId};

use crate::seed::MAX_SEED_ID;

/// Hands out record ids.
///
/// Events and reports get integers from a counter seeded with the clock at
/// startup. Each id is strictly greater than every id handed out before it
/// and than every integer id already in the target collection. Notifications
/// get prefixed UUIDv7 strings.
#[derive(Debug)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn seeded(start: i64) -> Self {
        Self {
            last: AtomicI64::new(start.max(MAX_SEED_ID)),
        }
    }

    /// Next integer id, greater than `floor`.
    pub fn next_int(&self, floor: i64) -> i64 {
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(last.max(floor) + 1)
            })
            .unwrap_or(floor);
        prev.max(floor) + 1
    }

    /// Fresh id for a record about to join `existing`.
    pub fn next_for(&self, kind: CollectionKind, existing: &[Record]) -> RecordId {
        match kind {
            CollectionKind::Notifications => RecordId::Str(notification_id()),
            CollectionKind::Events | CollectionKind::Reports => {
                let floor = existing
                    .iter()
                    .filter_map(|r| r.id().and_then(|id| id.as_int()))
                    .max()
                    .unwrap_or(0);
                RecordId::Int(self.next_int(floor))
            }
        }
    }
}
