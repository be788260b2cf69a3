use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, instrument, warn};

use civic_core::clock::Clock;
use civic_core::record::{position_of, CollectionKind, CollectionSet, Record, RecordId, ID_FIELD};

use crate::backend::RecordBackend;
use crate::error::StoreError;
use crate::ids::IdGenerator;
use crate::seed::default_collection;

#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Keep at most this many notifications, dropping the oldest first.
    pub max_notifications: Option<usize>,
    /// Log failed persists and return the in-memory result instead of an error.
    pub swallow_write_errors: bool,
}

/// Result of a single-record write.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOutcome {
    /// The written record. `None` when an update matched nothing.
    pub record: Option<Record>,
    /// The whole collection after the write.
    pub collection: Vec<Record>,
}

/// Seed materialized for one collection, reused until the backend has data.
type SeedSlot = Option<Vec<Record>>;

/// The three collections behind a [`RecordBackend`].
///
/// Every read-modify-write runs under a per-collection lock, and freshness
/// markers are stamped while that lock is held. A caller that reads the
/// clock before loading therefore never misses a write stamped earlier.
/// Seed records carry the time the store was built, so they are never
/// newer than any later clock reading either.
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    ids: IdGenerator,
    seeded_at: i64,
    locks: [Mutex<SeedSlot>; 3],
}

impl RecordStore {
    pub fn new(backend: Arc<dyn RecordBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(backend, clock, StoreConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn RecordBackend>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> Self {
        let seeded_at = clock.now_ms();
        Self {
            backend,
            clock,
            config,
            ids: IdGenerator::seeded(seeded_at),
            seeded_at,
            locks: Default::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Read the store clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// All three collections. Never fails.
    pub fn load_all(&self) -> CollectionSet {
        let mut set = CollectionSet::default();
        for kind in CollectionKind::ALL {
            *set.get_mut(kind) = self.load(kind);
        }
        set
    }

    /// One collection. Missing or unreadable data yields the seed.
    pub fn load(&self, kind: CollectionKind) -> Vec<Record> {
        let mut slot = self.lock(kind);
        self.read_locked(kind, &mut slot)
    }

    /// Records of `kind` whose freshness marker is greater than `since`.
    pub fn changed_since(&self, kind: CollectionKind, since: i64) -> Vec<Record> {
        self.load(kind)
            .into_iter()
            .filter(|r| r.freshness(kind) > since)
            .collect()
    }

    /// Append `record`, giving it a fresh id when it has none or its id is
    /// already taken, and stamping it with the current time.
    #[instrument(skip(self, record), fields(kind = %kind))]
    pub fn append(&self, kind: CollectionKind, mut record: Record) -> Result<WriteOutcome, StoreError> {
        let mut slot = self.lock(kind);
        let mut records = self.read_locked(kind, &mut slot);

        let needs_id = match record.id() {
            Some(id) => position_of(&records, &id).is_some(),
            None => true,
        };
        if needs_id {
            let id = self.ids.next_for(kind, &records);
            record.set_id(&id);
        }
        record.stamp(kind, self.clock.now_ms());
        records.push(record.clone());

        if kind == CollectionKind::Notifications {
            if let Some(cap) = self.config.max_notifications {
                if records.len() > cap {
                    let dropped = records.len() - cap;
                    records.drain(..dropped);
                    debug!(dropped, cap, "notification retention applied");
                }
            }
        }

        self.persist(kind, &records, &mut slot)?;
        debug!(id = ?record.id(), count = records.len(), "record appended");
        Ok(WriteOutcome {
            record: Some(record),
            collection: records,
        })
    }

    /// Shallow-merge `partial` into the record with `id` and re-stamp it.
    /// A missing id writes nothing and returns the collection unchanged.
    #[instrument(skip(self, partial), fields(kind = %kind, id = %id))]
    pub fn merge_update(
        &self,
        kind: CollectionKind,
        id: &RecordId,
        partial: &Record,
    ) -> Result<WriteOutcome, StoreError> {
        let mut slot = self.lock(kind);
        let mut records = self.read_locked(kind, &mut slot);

        let Some(index) = position_of(&records, id) else {
            debug!("update target not found");
            return Ok(WriteOutcome {
                record: None,
                collection: records,
            });
        };

        let mut partial = partial.clone();
        partial.remove(ID_FIELD);
        let target = &mut records[index];
        target.merge_from(&partial);
        target.stamp(kind, self.clock.now_ms());
        let updated = target.clone();

        self.persist(kind, &records, &mut slot)?;
        Ok(WriteOutcome {
            record: Some(updated),
            collection: records,
        })
    }

    /// Stamp every incoming record, then merge it over the record with the
    /// same id or append it. Returns the collection after the write.
    #[instrument(skip(self, incoming), fields(kind = %kind, count = incoming.len()))]
    pub fn merge_batch(
        &self,
        kind: CollectionKind,
        incoming: Vec<Record>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut slot = self.lock(kind);
        let mut records = self.read_locked(kind, &mut slot);

        for mut record in incoming {
            record.stamp(kind, self.clock.now_ms());
            let existing = record.id().and_then(|id| position_of(&records, &id));
            match existing {
                Some(index) => records[index].merge_from(&record),
                None => {
                    if record.id().is_none() {
                        let id = self.ids.next_for(kind, &records);
                        record.set_id(&id);
                    }
                    records.push(record);
                }
            }
        }

        self.persist(kind, &records, &mut slot)?;
        Ok(records)
    }

    fn lock(&self, kind: CollectionKind) -> MutexGuard<'_, SeedSlot> {
        self.locks[kind.index()].lock()
    }

    fn read_locked(&self, kind: CollectionKind, slot: &mut SeedSlot) -> Vec<Record> {
        match self.backend.read(kind) {
            Ok(Some(records)) => records,
            Ok(None) => self.seed(kind, slot),
            Err(e) => {
                warn!(kind = %kind, error = %e, "collection unreadable, serving seed");
                self.seed(kind, slot)
            }
        }
    }

    fn seed(&self, kind: CollectionKind, slot: &mut SeedSlot) -> Vec<Record> {
        slot.get_or_insert_with(|| default_collection(kind, self.seeded_at))
            .clone()
    }

    fn persist(
        &self,
        kind: CollectionKind,
        records: &[Record],
        slot: &mut SeedSlot,
    ) -> Result<(), StoreError> {
        match self.backend.write(kind, records) {
            Ok(()) => {
                *slot = None;
                Ok(())
            }
            Err(e) if self.config.swallow_write_errors => {
                warn!(kind = %kind, error = %e, "persist failed, returning unsaved result");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::JsonFileBackend;
    use crate::memory::MemoryBackend;
    use civic_core::clock::{ManualClock, SystemClock};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
    }

    impl RecordBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn read(&self, kind: CollectionKind) -> Result<Option<Vec<Record>>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Io("disk unplugged".into()));
            }
            self.inner.read(kind)
        }

        fn write(&self, kind: CollectionKind, records: &[Record]) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Io("disk full".into()));
            }
            self.inner.write(kind, records)
        }
    }

    fn store_with_clock(clock: Arc<ManualClock>) -> RecordStore {
        RecordStore::new(Arc::new(MemoryBackend::new()), clock)
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn load_on_empty_returns_seed() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(1_000, 1)));
        let set = store.load_all();
        assert_eq!(set.events.len(), 2);
        assert_eq!(set.reports.len(), 1);
        assert!(set.notifications.is_empty());
    }

    #[test]
    fn load_on_empty_is_idempotent() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(1_000, 1)));
        let first = store.load_all();
        let second = store.load_all();
        assert_eq!(first, second);
    }

    #[test]
    fn seed_is_stamped_when_the_store_is_built() {
        let clock = Arc::new(ManualClock::new(100));
        let store = store_with_clock(clock.clone());
        clock.set(900);

        let read_at = store.now_ms();
        let events = store.load(CollectionKind::Events);
        for event in &events {
            assert_eq!(event.get_i64("lastModified"), Some(100));
        }
        assert!(store.changed_since(CollectionKind::Events, read_at).is_empty());
    }

    #[test]
    fn corrupt_file_degrades_to_seed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("events.json"), "{{{{").unwrap();
        let store = RecordStore::new(
            Arc::new(JsonFileBackend::new(dir.path())),
            Arc::new(SystemClock::new()),
        );

        let events = store.load(CollectionKind::Events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id(), Some(RecordId::Int(1)));
    }

    #[test]
    fn append_assigns_fresh_id_and_stamp() {
        let clock = Arc::new(ManualClock::new(5_000));
        let store = store_with_clock(clock.clone());
        clock.set(7_000);

        let out = store
            .append(CollectionKind::Events, record(json!({"title": "X"})))
            .unwrap();
        let event = out.record.unwrap();
        let id = event.id().and_then(|id| id.as_int()).unwrap();
        assert!(id > 2, "id {id} collides with the seed");
        assert_eq!(event.get_i64("lastModified"), Some(7_000));
        assert_eq!(out.collection.len(), 3);
        assert_eq!(out.collection.last(), Some(&event));
    }

    #[test]
    fn append_replaces_colliding_id() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(100, 1)));
        let out = store
            .append(CollectionKind::Events, record(json!({"id": 1, "title": "dup"})))
            .unwrap();
        assert_ne!(out.record.unwrap().id(), Some(RecordId::Int(1)));
    }

    #[test]
    fn append_keeps_unused_id() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(100, 1)));
        let out = store
            .append(CollectionKind::Reports, record(json!({"id": "r-9"})))
            .unwrap();
        assert_eq!(out.record.unwrap().id(), Some(RecordId::from("r-9")));
    }

    #[test]
    fn ids_stay_unique_over_many_appends() {
        let store = RecordStore::new(Arc::new(MemoryBackend::new()), Arc::new(SystemClock::new()));
        for i in 0..200 {
            store
                .append(CollectionKind::Reports, record(json!({"title": i})))
                .unwrap();
        }
        let reports = store.load(CollectionKind::Reports);
        let ids: HashSet<RecordId> = reports.iter().filter_map(Record::id).collect();
        assert_eq!(ids.len(), reports.len());
        assert_eq!(reports.len(), 201);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let store = Arc::new(RecordStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(SystemClock::new()),
        ));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .append(CollectionKind::Events, record(json!({"t": t, "i": i})))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let events = store.load(CollectionKind::Events);
        assert_eq!(events.len(), 2 + 8 * 25);
        let ids: HashSet<RecordId> = events.iter().filter_map(Record::id).collect();
        assert_eq!(ids.len(), events.len());
    }

    #[test]
    fn notifications_get_string_ids_and_timestamp() {
        let store = store_with_clock(Arc::new(ManualClock::new(42)));
        let out = store
            .append(
                CollectionKind::Notifications,
                record(json!({"type": "new-event", "eventId": 3})),
            )
            .unwrap();
        let n = out.record.unwrap();
        assert!(matches!(n.id(), Some(RecordId::Str(s)) if s.starts_with("ntf_")));
        assert_eq!(n.get_i64("timestamp"), Some(42));
        assert!(n.get("lastModified").is_none());
    }

    #[test]
    fn merge_update_restamps_and_merges() {
        let clock = Arc::new(ManualClock::new(100));
        let store = store_with_clock(clock.clone());
        let before = store.load(CollectionKind::Events)[0].freshness(CollectionKind::Events);

        clock.set(200);
        let out = store
            .merge_update(
                CollectionKind::Events,
                &RecordId::Int(1),
                &record(json!({"status": "completed", "lastModified": 1})),
            )
            .unwrap();
        let event = out.record.unwrap();
        assert_eq!(event.get_str("status"), Some("completed"));
        assert_eq!(event.get_str("type"), Some("lecture"));
        assert!(event.freshness(CollectionKind::Events) > before);
        assert_eq!(event.get_i64("lastModified"), Some(200));
    }

    #[test]
    fn merge_update_cannot_change_the_id() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(100, 1)));
        let out = store
            .merge_update(
                CollectionKind::Events,
                &RecordId::Int(1),
                &record(json!({"id": 2, "title": "renamed"})),
            )
            .unwrap();
        assert_eq!(out.record.unwrap().id(), Some(RecordId::Int(1)));
    }

    #[test]
    fn merge_update_missing_id_is_a_no_op() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(100, 1)));
        let before = store.load(CollectionKind::Events);
        let out = store
            .merge_update(
                CollectionKind::Events,
                &RecordId::Int(999),
                &record(json!({"status": "gone"})),
            )
            .unwrap();
        assert!(out.record.is_none());
        assert_eq!(out.collection, before);
        assert_eq!(store.load(CollectionKind::Events), before);
    }

    #[test]
    fn later_update_wins_on_overlap_and_keeps_the_rest() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(100, 1)));
        let id = RecordId::Int(1);
        let kind = CollectionKind::Reports;
        store
            .merge_update(kind, &id, &record(json!({"status": "investigating", "note": "a"})))
            .unwrap();
        store
            .merge_update(kind, &id, &record(json!({"assignedTo": "Bob", "note": "b"})))
            .unwrap();

        let report = store.load(kind).into_iter().next().unwrap();
        assert_eq!(report.get_str("status"), Some("investigating"));
        assert_eq!(report.get_str("assignedTo"), Some("Bob"));
        assert_eq!(report.get_str("note"), Some("b"));
    }

    #[test]
    fn merge_batch_restamps_unchanged_records() {
        let clock = Arc::new(ManualClock::new(100));
        let store = store_with_clock(clock.clone());
        let events = store.load(CollectionKind::Events);

        clock.set(500);
        let merged = store.merge_batch(CollectionKind::Events, events.clone()).unwrap();
        assert_eq!(merged.len(), 2);
        for (old, new) in events.iter().zip(&merged) {
            assert!(new.freshness(CollectionKind::Events) > old.freshness(CollectionKind::Events));
        }
    }

    #[test]
    fn merge_batch_overwrites_client_stamp() {
        let store = store_with_clock(Arc::new(ManualClock::new(300)));
        let merged = store
            .merge_batch(
                CollectionKind::Events,
                vec![record(json!({"id": 2, "participants": 24, "lastModified": 9_999_999}))],
            )
            .unwrap();
        assert_eq!(merged[1].get_i64("participants"), Some(24));
        assert_eq!(merged[1].get_i64("lastModified"), Some(300));
    }

    #[test]
    fn merge_batch_appends_unknown_and_idless_records() {
        let store = store_with_clock(Arc::new(ManualClock::ticking(100, 1)));
        let merged = store
            .merge_batch(
                CollectionKind::Events,
                vec![record(json!({"id": 77, "title": "new"})), record(json!({"title": "no id"}))],
            )
            .unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[2].id(), Some(RecordId::Int(77)));
        let generated = merged[3].id().and_then(|id| id.as_int()).unwrap();
        assert!(generated > 77);
    }

    #[test]
    fn changed_since_filters_by_freshness() {
        let clock = Arc::new(ManualClock::new(100));
        let store = store_with_clock(clock.clone());
        store.load_all();

        clock.set(200);
        store
            .merge_update(CollectionKind::Events, &RecordId::Int(2), &record(json!({"x": 1})))
            .unwrap();

        let changed = store.changed_since(CollectionKind::Events, 150);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id(), Some(RecordId::Int(2)));
        assert_eq!(store.changed_since(CollectionKind::Events, 0).len(), 2);
        assert!(store.changed_since(CollectionKind::Events, 200).is_empty());
    }

    #[test]
    fn failed_write_surfaces_and_leaves_data_untouched() {
        let backend = Arc::new(FlakyBackend::default());
        let store = RecordStore::new(backend.clone(), Arc::new(ManualClock::ticking(100, 1)));
        store
            .append(CollectionKind::Events, record(json!({"title": "kept"})))
            .unwrap();
        let before = store.load(CollectionKind::Events);

        backend.fail_writes.store(true, Ordering::SeqCst);
        let err = store
            .merge_batch(CollectionKind::Events, vec![record(json!({"id": 1, "x": 1}))])
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));

        backend.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(store.load(CollectionKind::Events), before);
    }

    #[test]
    fn swallow_mode_returns_unsaved_result() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let store = RecordStore::with_config(
            backend,
            Arc::new(ManualClock::ticking(100, 1)),
            StoreConfig {
                swallow_write_errors: true,
                ..Default::default()
            },
        );

        let out = store
            .append(CollectionKind::Reports, record(json!({"title": "unsaved"})))
            .unwrap();
        assert_eq!(out.collection.len(), 2);
        assert_eq!(store.load(CollectionKind::Reports).len(), 1);
    }

    #[test]
    fn unreadable_backend_serves_seed() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_reads.store(true, Ordering::SeqCst);
        let store = RecordStore::new(backend, Arc::new(ManualClock::ticking(100, 1)));
        let set = store.load_all();
        assert_eq!(set.events.len(), 2);
        assert_eq!(set, store.load_all());
    }

    #[test]
    fn notification_retention_drops_oldest() {
        let store = RecordStore::with_config(
            Arc::new(MemoryBackend::new()),
            Arc::new(ManualClock::ticking(100, 1)),
            StoreConfig {
                max_notifications: Some(2),
                ..Default::default()
            },
        );
        for i in 0..4 {
            store
                .append(CollectionKind::Notifications, record(json!({"n": i})))
                .unwrap();
        }
        let kept: Vec<i64> = store
            .load(CollectionKind::Notifications)
            .iter()
            .filter_map(|r| r.get_i64("n"))
            .collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[test]
    fn persisted_data_replaces_seed() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store = RecordStore::new(Arc::new(JsonFileBackend::new(dir.path())), clock.clone());
        store
            .append(CollectionKind::Events, record(json!({"title": "persisted"})))
            .unwrap();

        let reopened = RecordStore::new(Arc::new(JsonFileBackend::new(dir.path())), clock);
        let events = reopened.load(CollectionKind::Events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].get_str("title"), Some("persisted"));
    }
}
