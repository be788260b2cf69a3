//! JSON bodies exchanged between the gateway and its clients.

use serde::{Deserialize, Serialize};

use crate::record::{CollectionKind, CollectionSet, Record, RecordId};

pub const LOAD_PATH: &str = "/sync/load";
pub const UPDATES_PATH: &str = "/sync/updates";
pub const EVENTS_PATH: &str = "/sync/events";
pub const REPORTS_PATH: &str = "/sync/reports";
pub const NOTIFICATIONS_PATH: &str = "/sync/notifications";
pub const USERS_PATH: &str = "/sync/users";
pub const REGISTER_PATH: &str = "/sync/users/register";
pub const HEALTH_PATH: &str = "/health";

/// Write actions accepted by both collection endpoints.
pub const KNOWN_ACTIONS: [&str; 3] = ["add", "update", "sync"];

/// `GET /sync/load`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadResponse {
    #[serde(flatten)]
    pub collections: CollectionSet,
    pub timestamp: i64,
}

/// `GET /sync/updates?since=`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatesResponse {
    pub has_updates: bool,
    #[serde(default)]
    pub events: Vec<Record>,
    #[serde(default)]
    pub reports: Vec<Record>,
    #[serde(default)]
    pub notifications: Vec<Record>,
    pub timestamp: i64,
}

impl UpdatesResponse {
    pub fn collection(&self, kind: CollectionKind) -> &[Record] {
        match kind {
            CollectionKind::Events => &self.events,
            CollectionKind::Reports => &self.reports,
            CollectionKind::Notifications => &self.notifications,
        }
    }
}

/// Parse the `since` query value. Missing or unparsable values read as 0,
/// which asks for everything.
pub fn parse_since(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0)
}

/// `POST /sync/events` body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum EventAction {
    Add {
        event: Record,
    },
    Update {
        #[serde(rename = "eventId")]
        event_id: RecordId,
        #[serde(default)]
        updates: Record,
    },
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        events: Option<Vec<Record>>,
    },
}

/// `POST /sync/reports` body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ReportAction {
    Add {
        report: Record,
    },
    Update {
        #[serde(rename = "reportId")]
        report_id: RecordId,
        #[serde(default)]
        updates: Record,
    },
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reports: Option<Vec<Record>>,
    },
}

/// Collection-independent form of a write request.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteAction {
    Add(Record),
    Update { id: RecordId, updates: Record },
    /// `None` when the body carried no batch; the gateway answers with the
    /// current collection and writes nothing.
    Sync(Option<Vec<Record>>),
}

impl WriteAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update { .. } => "update",
            Self::Sync(_) => "sync",
        }
    }
}

impl From<EventAction> for WriteAction {
    fn from(action: EventAction) -> Self {
        match action {
            EventAction::Add { event } => Self::Add(event),
            EventAction::Update { event_id, updates } => Self::Update {
                id: event_id,
                updates,
            },
            EventAction::Sync { events } => Self::Sync(events),
        }
    }
}

impl From<ReportAction> for WriteAction {
    fn from(action: ReportAction) -> Self {
        match action {
            ReportAction::Add { report } => Self::Add(report),
            ReportAction::Update { report_id, updates } => Self::Update {
                id: report_id,
                updates,
            },
            ReportAction::Sync { reports } => Self::Sync(reports),
        }
    }
}

/// Response to `POST /sync/events`. `event` is absent for `sync`, and for an
/// `update` whose id matched nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsWriteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Record>,
    #[serde(default)]
    pub events: Vec<Record>,
}

/// Response to `POST /sync/reports`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportsWriteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Record>,
    #[serde(default)]
    pub reports: Vec<Record>,
}

/// Response to `POST /sync/notifications`: the notification as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub notification: Record,
}

/// `POST /sync/users/register` body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_id: String,
    #[serde(default)]
    pub user_role: String,
}

/// A user the gateway has seen register.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: String,
    pub user_role: String,
    pub registered_at: i64,
    pub last_seen: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub user: UserPresence,
}

/// `GET /sync/users`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserPresence>,
}

/// Error payload for 4xx/5xx responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub uptime_secs: u64,
}
