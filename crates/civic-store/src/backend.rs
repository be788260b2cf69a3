use std::path::Path;
use std::sync::Arc;

use civic_core::record::{CollectionKind, Record};
use civic_core::settings::BackendKind;

use crate::error::StoreError;
use crate::file::JsonFileBackend;
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;

/// Where the three collections are persisted.
///
/// A backend moves whole collections: `write` replaces everything stored for
/// `kind`. Merging, stamping and fallback to the seed happen in
/// [`RecordStore`](crate::RecordStore).
pub trait RecordBackend: Send + Sync {
    /// Short name reported by the health endpoint.
    fn name(&self) -> &'static str;

    /// `Ok(None)` when nothing has been stored for `kind` yet.
    fn read(&self, kind: CollectionKind) -> Result<Option<Vec<Record>>, StoreError>;

    /// Replace the stored collection. Either the whole collection is
    /// persisted or the previous contents stay in place.
    fn write(&self, kind: CollectionKind, records: &[Record]) -> Result<(), StoreError>;
}

/// Build the backend selected in settings. File and SQLite backends live
/// under `data_dir`.
pub fn open_backend(
    kind: BackendKind,
    data_dir: &Path,
) -> Result<Arc<dyn RecordBackend>, StoreError> {
    Ok(match kind {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => Arc::new(JsonFileBackend::new(data_dir)),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&data_dir.join("sync.db"))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_each_backend_kind() {
        let dir = tempfile::tempdir().unwrap();
        for (kind, name) in [
            (BackendKind::Memory, "memory"),
            (BackendKind::File, "file"),
            (BackendKind::Sqlite, "sqlite"),
        ] {
            let backend = open_backend(kind, dir.path()).unwrap();
            assert_eq!(backend.name(), name);
            assert!(backend.read(CollectionKind::Events).unwrap().is_none());
        }
        assert!(dir.path().join("sync.db").exists());
    }
}
