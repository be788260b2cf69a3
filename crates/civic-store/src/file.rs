use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use civic_core::record::{CollectionKind, Record};

use crate::backend::RecordBackend;
use crate::error::StoreError;

/// One pretty-printed JSON array per collection (`events.json`,
/// `reports.json`, `notifications.json`) inside a data directory.
///
/// Every write rewrites the file through a temp file and a rename, so a
/// reader never sees a half-written array.
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// The directory is created on the first write, not here.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: CollectionKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

impl RecordBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self, kind: CollectionKind) -> Result<Option<Vec<Record>>, StoreError> {
        let path = self.path_for(kind);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
        };
        let records: Vec<Record> = serde_json::from_str(&content)?;
        Ok(Some(records))
    }

    fn write(&self, kind: CollectionKind, records: &[Record]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;

        let path = self.path_for(kind);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&tmp, json)
            .map_err(|e| StoreError::Io(format!("write {}: {e}", tmp.display())))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(StoreError::Io(format!("rename to {}: {e}", path.display())));
        }

        debug!(path = %path.display(), count = records.len(), "collection written");
        Ok(())
    }
}
