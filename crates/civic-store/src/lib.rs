pub mod backend;
pub mod database;
pub mod error;
pub mod file;
pub mod ids;
pub mod memory;
pub mod schema;
pub mod seed;
pub mod sqlite;
pub mod store;

pub use backend::{open_backend, RecordBackend};
pub use database::Database;
pub use error::StoreError;
pub use file::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{RecordStore, StoreConfig, WriteOutcome};
