//! Client side of the sync protocol: a polling [`SyncClient`] that publishes
//! change notifications, and the [`AppStore`] reducer that turns them into
//! application state.

pub mod app;
pub mod client;
pub mod cursor;
pub mod error;
pub mod events;
pub mod mock;
pub mod snapshot;
pub mod state;
pub mod transport;

pub use app::{bridge_actions, AppStore, EffectResult};
pub use client::{ClientConfig, ClientPhase, PollOutcome, SessionInfo, SyncClient, SyncOutcome};
pub use error::ClientError;
pub use events::{Batch, SubscriptionId, SyncEvent, SyncEventKind};
pub use mock::{MockRequest, MockTransport};
pub use snapshot::{Snapshot, SnapshotFile};
pub use state::{plan_effects, reduce, AppAction, AppSettings, AppState, Effect};
pub use transport::{HttpTransport, SyncTransport};
