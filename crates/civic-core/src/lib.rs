pub mod clock;
pub mod ids;
pub mod record;
pub mod settings;
pub mod wire;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{notification_id, SessionId};
pub use record::{CollectionKind, CollectionSet, Record, RecordId};
pub use settings::{SettingsError, SyncSettings};
