use parking_lot::RwLock;

use civic_core::record::{CollectionKind, Record};

use crate::backend::RecordBackend;
use crate::error::StoreError;

/// Keeps the collections in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    slots: RwLock<[Option<Vec<Record>>; 3]>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, kind: CollectionKind) -> Result<Option<Vec<Record>>, StoreError> {
        Ok(self.slots.read()[kind.index()].clone())
    }

    fn write(&self, kind: CollectionKind, records: &[Record]) -> Result<(), StoreError> {
        self.slots.write()[kind.index()] = Some(records.to_vec());
        Ok(())
    }
}
