use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use civic_core::record::{CollectionKind, Record};

use crate::backend::RecordBackend;
use crate::database::Database;
use crate::error::StoreError;

/// Stores each collection as one row of the `collections` table.
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    /// When `kind` was last written, as RFC 3339.
    pub fn updated_at(&self, kind: CollectionKind) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT updated_at FROM collections WHERE kind = ?1",
                    [kind.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

impl RecordBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self), fields(kind = %kind))]
    fn read(&self, kind: CollectionKind) -> Result<Option<Vec<Record>>, StoreError> {
        let payload: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM collections WHERE kind = ?1",
                    [kind.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, records), fields(kind = %kind, count = records.len()))]
    fn write(&self, kind: CollectionKind, records: &[Record]) -> Result<(), StoreError> {
        let payload = serde_json::to_string(records)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO collections (kind, payload, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(kind) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
                rusqlite::params![kind.as_str(), payload, now],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_keeps_field_order() {
        let backend = SqliteBackend::in_memory().unwrap();
        let record = Record::new()
            .with("id", 1)
            .with("title", "Open data lecture")
            .with("lastModified", 100);
        backend.write(CollectionKind::Events, &[record.clone()]).unwrap();

        let stored = backend.read(CollectionKind::Events).unwrap().unwrap();
        assert_eq!(stored, vec![record]);
        let keys: Vec<&String> = stored[0].as_map().keys().collect();
        assert_eq!(keys, ["id", "title", "lastModified"]);
    }

    #[test]
    fn upsert_replaces_row() {
        let backend = SqliteBackend::in_memory().unwrap();
        let kind = CollectionKind::Notifications;
        backend.write(kind, &[Record::new().with("id", "a")]).unwrap();
        backend
            .write(kind, &[Record::new().with("id", "a"), Record::new().with("id", "b")])
            .unwrap();

        assert_eq!(backend.read(kind).unwrap().unwrap().len(), 2);
        assert!(backend.updated_at(kind).unwrap().is_some());
        assert!(backend.updated_at(CollectionKind::Events).unwrap().is_none());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        SqliteBackend::open(&path)
            .unwrap()
            .write(CollectionKind::Reports, &[Record::new().with("id", 5)])
            .unwrap();

        let reopened = SqliteBackend::open(&path).unwrap();
        let reports = reopened.read(CollectionKind::Reports).unwrap().unwrap();
        assert_eq!(reports[0].get_i64("id"), Some(5));
    }

    #[test]
    fn corrupt_payload_is_a_serialization_error() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO collections (kind, payload, updated_at) VALUES ('events', 'not json', 'x')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let backend = SqliteBackend::new(db);
        assert!(matches!(
            backend.read(CollectionKind::Events),
            Err(StoreError::Serialization(_))
        ));
    }
}
