use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use civic_core::record::{CollectionKind, Record};

use crate::error::ClientError;

/// What a client keeps on disk between runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub events: Vec<Record>,
    pub reports: Vec<Record>,
    pub notifications: Vec<Record>,
    pub last_sync: i64,
}

impl Snapshot {
    pub fn collection_mut(&mut self, kind: CollectionKind) -> &mut Vec<Record> {
        match kind {
            CollectionKind::Events => &mut self.events,
            CollectionKind::Reports => &mut self.reports,
            CollectionKind::Notifications => &mut self.notifications,
        }
    }
}

/// JSON snapshot file.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is missing or unreadable.
    pub fn load(&self) -> Option<Snapshot> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read snapshot");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt snapshot");
                None
            }
        }
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), last_sync = snapshot.last_sync, "snapshot saved");
        Ok(())
    }

    /// Replace the given collections, keep the others, and record `last_sync`.
    pub fn update(
        &self,
        collections: &[(CollectionKind, &[Record])],
        last_sync: i64,
    ) -> Result<(), ClientError> {
        let mut snapshot = self.load().unwrap_or_default();
        for (kind, records) in collections {
            *snapshot.collection_mut(*kind) = records.to_vec();
        }
        snapshot.last_sync = snapshot.last_sync.max(last_sync);
        self.save(&snapshot)
    }
}
