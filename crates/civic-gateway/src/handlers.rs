use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use civic_core::record::{CollectionKind, Record, ID_FIELD, LAST_MODIFIED_FIELD, TIMESTAMP_FIELD};
use civic_core::wire::{
    parse_since, BroadcastResponse, EventAction, EventsWriteResponse, HealthResponse,
    LoadResponse, RegisterRequest, RegisterResponse, ReportAction, ReportsWriteResponse,
    UpdatesResponse, UsersResponse, WriteAction, KNOWN_ACTIONS,
};

use crate::error::ApiError;
use crate::server::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    pub since: Option<String>,
}

/// `GET /sync/load`
pub async fn load(State(state): State<GatewayState>) -> Json<LoadResponse> {
    let timestamp = state.store.now_ms();
    let collections = state.store.load_all();
    Json(LoadResponse {
        collections,
        timestamp,
    })
}

/// `GET /sync/updates?since=`
///
/// Events and reports come back whole when any record changed. Notifications
/// come back filtered.
pub async fn updates(
    State(state): State<GatewayState>,
    Query(query): Query<SinceQuery>,
) -> Json<UpdatesResponse> {
    let since = parse_since(query.since.as_deref());
    let timestamp = state.store.now_ms();

    let full_if_changed = |kind: CollectionKind| {
        let records = state.store.load(kind);
        if records.iter().any(|r| r.freshness(kind) > since) {
            records
        } else {
            Vec::new()
        }
    };
    let events = full_if_changed(CollectionKind::Events);
    let reports = full_if_changed(CollectionKind::Reports);
    let notifications = state
        .store
        .changed_since(CollectionKind::Notifications, since);

    let has_updates = !events.is_empty() || !reports.is_empty() || !notifications.is_empty();
    debug!(since, has_updates, "updates computed");

    Json(UpdatesResponse {
        has_updates,
        events,
        reports,
        notifications,
        timestamp,
    })
}

/// `POST /sync/events`
pub async fn events(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<EventsWriteResponse>, ApiError> {
    let action: EventAction = decode_action(&body)?;
    let (event, events) = apply_write(&state, CollectionKind::Events, action.into())?;
    Ok(Json(EventsWriteResponse { event, events }))
}

/// `POST /sync/reports`
pub async fn reports(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<ReportsWriteResponse>, ApiError> {
    let action: ReportAction = decode_action(&body)?;
    let (report, reports) = apply_write(&state, CollectionKind::Reports, action.into())?;
    Ok(Json(ReportsWriteResponse { report, reports }))
}

/// `POST /sync/notifications`
///
/// Stores the body as a notification for every client. The gateway assigns
/// the id and `timestamp`.
pub async fn broadcast(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
    let mut notification = Record::from_value(value)
        .ok_or_else(|| ApiError::BadRequest("Notification must be an object".into()))?;
    notification.remove(ID_FIELD);
    notification.remove(TIMESTAMP_FIELD);

    let outcome = state
        .store
        .append(CollectionKind::Notifications, notification)?;
    let notification = outcome.record.unwrap_or_default();
    info!(id = ?notification.id(), "notification broadcast");
    Ok(Json(BroadcastResponse {
        success: true,
        notification,
    }))
}

/// `POST /sync/users/register`
pub async fn register_user(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<RegisterResponse>, ApiError> {
    let req: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid payload: {e}")))?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId is required".into()));
    }

    let user = state.users.register(&req, state.store.now_ms());
    info!(user_id = %user.user_id, role = %user.user_role, "user registered");
    Ok(Json(RegisterResponse {
        success: true,
        user,
    }))
}

/// `GET /sync/users`
pub async fn users(State(state): State<GatewayState>) -> Json<UsersResponse> {
    Json(UsersResponse {
        users: state.users.list(),
    })
}

/// `GET /health`
pub async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        backend: state.store.backend_name().into(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Decode a write body in two steps so an unknown action and a malformed
/// payload produce different messages.
fn decode_action<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;

    let action = value.get("action").and_then(Value::as_str);
    match action {
        Some(name) if KNOWN_ACTIONS.contains(&name) => {}
        _ => return Err(ApiError::BadRequest("Unknown action".into())),
    }

    serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid payload: {e}")))
}

fn apply_write(
    state: &GatewayState,
    kind: CollectionKind,
    action: WriteAction,
) -> Result<(Option<Record>, Vec<Record>), ApiError> {
    let name = action.name();
    let result = match action {
        WriteAction::Add(mut record) => {
            record.remove(ID_FIELD);
            record.remove(LAST_MODIFIED_FIELD);
            let outcome = state.store.append(kind, record)?;
            if let Some(created) = &outcome.record {
                info!(kind = %kind, id = ?created.id(), "record added");
                create_notification(state, kind, created);
            }
            (outcome.record, outcome.collection)
        }
        WriteAction::Update { id, updates } => {
            let outcome = state.store.merge_update(kind, &id, &updates)?;
            if outcome.record.is_none() {
                debug!(kind = %kind, id = %id, "update for unknown id ignored");
            }
            (outcome.record, outcome.collection)
        }
        WriteAction::Sync(Some(batch)) => (None, state.store.merge_batch(kind, batch)?),
        WriteAction::Sync(None) => (None, state.store.load(kind)),
    };
    debug!(kind = %kind, action = name, count = result.1.len(), "write applied");
    Ok(result)
}

/// Announce a newly added event or report. Failures are logged only.
fn create_notification(state: &GatewayState, kind: CollectionKind, created: &Record) {
    let title = created.get_str("title").unwrap_or("untitled");
    let id = created.get("id").cloned().unwrap_or(Value::Null);

    let notification = match kind {
        CollectionKind::Events => Record::new()
            .with("type", "new-event")
            .with("title", "New event!")
            .with("message", format!("Event \"{title}\" was created"))
            .with("eventId", id),
        CollectionKind::Reports => {
            let mut n = Record::new()
                .with("type", "new-report")
                .with("title", "New report!")
                .with("message", format!("Report received: \"{title}\""))
                .with("reportId", id);
            if let Some(priority) = created.get("priority") {
                n.set("priority", priority.clone());
            }
            n
        }
        CollectionKind::Notifications => return,
    };

    if let Err(e) = state
        .store
        .append(CollectionKind::Notifications, notification)
    {
        warn!(kind = %kind, error = %e, "failed to create notification");
    }
}
