//! Application state and the pure reducer that drives it.
//!
//! `reduce` never performs I/O and never reads the clock. Side effects an
//! action implies are computed separately by [`plan_effects`] and run by
//! [`AppStore`](crate::AppStore).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use civic_core::record::{Record, RecordId};
use civic_core::wire::LoadResponse;

const PARTICIPANTS_FIELD: &str = "participants";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub push_notifications: bool,
    pub email_notifications: bool,
    pub dark_mode: bool,
    pub language: String,
    /// Settings this build does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            push_notifications: true,
            email_notifications: true,
            dark_mode: false,
            language: "ru".into(),
            extra: Map::new(),
        }
    }
}

impl AppSettings {
    /// Shallow-merge `patch`. A known key with a value of the wrong type is
    /// ignored.
    fn merged(&self, patch: &Map<String, Value>) -> Self {
        let mut next = self.clone();
        for (key, value) in patch {
            match key.as_str() {
                "pushNotifications" => {
                    if let Some(v) = value.as_bool() {
                        next.push_notifications = v;
                    }
                }
                "emailNotifications" => {
                    if let Some(v) = value.as_bool() {
                        next.email_notifications = v;
                    }
                }
                "darkMode" => {
                    if let Some(v) = value.as_bool() {
                        next.dark_mode = v;
                    }
                }
                "language" => {
                    if let Some(v) = value.as_str() {
                        next.language = v.to_string();
                    }
                }
                _ => {
                    next.extra.insert(key.clone(), value.clone());
                }
            }
        }
        next
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub user: Option<Record>,
    /// Events the user created.
    pub events: Vec<Record>,
    /// Reports the user filed.
    pub reports: Vec<Record>,
    pub courses: Vec<Record>,
    pub notifications: Vec<Record>,
    pub settings: AppSettings,
    /// Everyone's events, as last seen from the gateway.
    pub global_events: Vec<Record>,
    pub global_reports: Vec<Record>,
    pub is_online: bool,
    pub last_sync: i64,
    pub is_loading: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            user: None,
            events: Vec::new(),
            reports: Vec::new(),
            courses: Vec::new(),
            notifications: Vec::new(),
            settings: AppSettings::default(),
            global_events: Vec::new(),
            global_reports: Vec::new(),
            is_online: true,
            last_sync: 0,
            is_loading: true,
        }
    }
}

/// Everything that can change [`AppState`].
///
/// On the wire an action is `{"type": "SYNC_EVENTS", "payload": ...}`.
/// Unrecognized types decode to [`AppAction::Unknown`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AppAction {
    SetUser(Option<Record>),
    UpdateUser(Record),
    SetLoading(bool),
    SetOnlineStatus(bool),
    LoadInitialData(LoadResponse),
    SyncEvents { events: Vec<Record>, last_sync: i64 },
    SyncReports { reports: Vec<Record>, last_sync: i64 },
    RegisterEvent { event_id: RecordId },
    CancelEventRegistration { event_id: RecordId },
    AddGlobalEvent(Record),
    UpdateGlobalEvent { id: RecordId, updates: Record },
    AddGlobalReport(Record),
    UpdateGlobalReport { id: RecordId, updates: Record },
    AddReport(Record),
    UpdateReport { id: RecordId, updates: Record },
    StartCourse { course_id: RecordId },
    UpdateCourseProgress { course_id: RecordId, progress: Value },
    AddNotification(Record),
    MarkNotificationRead { id: RecordId },
    UpdateSettings(Map<String, Value>),
    SetNotifications(Vec<Record>),
    /// Replace the global event with the same id, or append it.
    UpsertGlobalEvent(Record),
    UpsertGlobalReport(Record),
    /// Merge `updates` into the global event `id`, if present.
    PatchGlobalEvent { id: RecordId, updates: Record },
    PatchGlobalReport { id: RecordId, updates: Record },
    #[serde(other)]
    Unknown,
}

/// A gateway write implied by an action.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    AddEvent(Record),
    UpdateEvent { id: RecordId, updates: Record },
    AddReport(Record),
    UpdateReport { id: RecordId, updates: Record },
    SyncEvents(Vec<Record>),
}

/// Pure state transition. Unknown actions return the state unchanged.
pub fn reduce(state: &AppState, action: &AppAction) -> AppState {
    let mut next = state.clone();
    match action {
        AppAction::SetUser(user) => next.user = user.clone(),
        AppAction::UpdateUser(patch) => {
            let mut user = next.user.take().unwrap_or_default();
            user.merge_from(patch);
            next.user = Some(user);
        }
        AppAction::SetLoading(loading) => next.is_loading = *loading,
        AppAction::SetOnlineStatus(online) => next.is_online = *online,
        AppAction::LoadInitialData(resp) => {
            next.global_events = resp.collections.events.clone();
            next.global_reports = resp.collections.reports.clone();
            next.notifications = resp.collections.notifications.clone();
            next.last_sync = next.last_sync.max(resp.timestamp);
            next.is_loading = false;
        }
        AppAction::SyncEvents { events, last_sync } => {
            next.global_events = events.clone();
            next.last_sync = next.last_sync.max(*last_sync);
        }
        AppAction::SyncReports { reports, last_sync } => {
            next.global_reports = reports.clone();
            next.last_sync = next.last_sync.max(*last_sync);
        }
        AppAction::RegisterEvent { event_id } => {
            update_where(&mut next.global_events, event_id, |event| {
                let count = event.get_i64(PARTICIPANTS_FIELD).unwrap_or(0);
                event.set(PARTICIPANTS_FIELD, count + 1);
            });
        }
        AppAction::CancelEventRegistration { event_id } => {
            update_where(&mut next.global_events, event_id, |event| {
                let count = event.get_i64(PARTICIPANTS_FIELD).unwrap_or(0);
                event.set(PARTICIPANTS_FIELD, (count - 1).max(0));
            });
        }
        // Applied once the gateway confirms, through the upsert/patch bridge.
        AppAction::AddGlobalEvent(_)
        | AppAction::UpdateGlobalEvent { .. }
        | AppAction::AddGlobalReport(_) => {}
        AppAction::UpdateGlobalReport { id, updates } | AppAction::PatchGlobalReport { id, updates } => {
            update_where(&mut next.global_reports, id, |r| r.merge_from(updates));
        }
        AppAction::AddReport(report) => {
            next.reports.push(report.clone());
            next.global_reports.push(report.clone());
        }
        AppAction::UpdateReport { id, updates } => {
            update_where(&mut next.reports, id, |r| r.merge_from(updates));
            update_where(&mut next.global_reports, id, |r| r.merge_from(updates));
        }
        AppAction::StartCourse { course_id } => {
            update_where(&mut next.courses, course_id, |course| {
                course.set("status", "in_progress");
                course.set("progress", 0);
            });
        }
        AppAction::UpdateCourseProgress {
            course_id,
            progress,
        } => {
            update_where(&mut next.courses, course_id, |course| {
                course.set("progress", progress.clone());
            });
        }
        AppAction::AddNotification(notification) => {
            next.notifications.insert(0, notification.clone());
        }
        AppAction::MarkNotificationRead { id } => {
            update_where(&mut next.notifications, id, |n| n.set("read", true));
        }
        AppAction::UpdateSettings(patch) => next.settings = state.settings.merged(patch),
        AppAction::SetNotifications(notifications) => next.notifications = notifications.clone(),
        AppAction::UpsertGlobalEvent(event) => upsert(&mut next.global_events, event),
        AppAction::UpsertGlobalReport(report) => upsert(&mut next.global_reports, report),
        AppAction::PatchGlobalEvent { id, updates } => {
            update_where(&mut next.global_events, id, |e| e.merge_from(updates));
        }
        AppAction::Unknown => {}
    }
    next
}

/// Gateway writes implied by `action`, computed against the state after
/// `reduce` has applied it.
pub fn plan_effects(action: &AppAction, next: &AppState) -> Vec<Effect> {
    match action {
        AppAction::RegisterEvent { event_id } | AppAction::CancelEventRegistration { event_id } => {
            next.global_events
                .iter()
                .find(|e| e.id().as_ref() == Some(event_id))
                .map(|touched| vec![Effect::SyncEvents(vec![touched.clone()])])
                .unwrap_or_default()
        }
        AppAction::AddGlobalEvent(event) => vec![Effect::AddEvent(event.clone())],
        AppAction::UpdateGlobalEvent { id, updates } => vec![Effect::UpdateEvent {
            id: id.clone(),
            updates: updates.clone(),
        }],
        AppAction::AddGlobalReport(report) => vec![Effect::AddReport(report.clone())],
        AppAction::UpdateGlobalReport { id, updates } => vec![Effect::UpdateReport {
            id: id.clone(),
            updates: updates.clone(),
        }],
        _ => Vec::new(),
    }
}

fn update_where(records: &mut [Record], id: &RecordId, f: impl Fn(&mut Record)) {
    records
        .iter_mut()
        .filter(|r| r.id().as_ref() == Some(id))
        .for_each(f);
}

fn upsert(records: &mut Vec<Record>, record: &Record) {
    let Some(id) = record.id() else {
        records.push(record.clone());
        return;
    };
    match civic_core::record::position_of(records, &id) {
        Some(idx) => records[idx] = record.clone(),
        None => records.push(record.clone()),
    }
}
