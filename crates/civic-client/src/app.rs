use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use civic_core::record::Record;
use civic_core::wire::LoadResponse;

use crate::client::SyncClient;
use crate::events::{SubscriptionId, SyncEvent, SyncEventKind};
use crate::state::{plan_effects, reduce, AppAction, AppState, Effect};

/// Outcome of one effect run by [`AppStore::dispatch`].
#[derive(Clone, Debug, PartialEq)]
pub struct EffectResult {
    pub effect: Effect,
    pub confirmed: bool,
}

/// Holds the [`AppState`] for a session and keeps it in step with a
/// [`SyncClient`].
#[derive(Clone)]
pub struct AppStore {
    state: Arc<RwLock<AppState>>,
    client: SyncClient,
    bridged: Arc<Mutex<Vec<(SyncEventKind, SubscriptionId)>>>,
}

impl AppStore {
    pub fn new(client: SyncClient) -> Self {
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            client,
            bridged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }

    pub fn state(&self) -> AppState {
        self.state.read().clone()
    }

    /// Reduce `action` and return the gateway writes it implies, without
    /// running them.
    pub fn apply(&self, action: &AppAction) -> Vec<Effect> {
        apply_to(&self.state, action)
    }

    /// Reduce `action`, then run its effects through the client. The state
    /// lock is not held while effects run, so confirmations published by the
    /// client land through the bridge.
    pub async fn dispatch(&self, action: AppAction) -> Vec<EffectResult> {
        let effects = self.apply(&action);
        let mut results = Vec::with_capacity(effects.len());
        for effect in effects {
            let confirmed = self.run(&effect).await;
            results.push(EffectResult { effect, confirmed });
        }
        results
    }

    /// Set the user, wire client events into the state and start syncing.
    pub async fn start_session(&self, user: Record) -> Option<LoadResponse> {
        let user_id = user.id().map(|id| id.to_string()).unwrap_or_default();
        let role = user.get_str("role").unwrap_or("user").to_string();
        self.apply(&AppAction::SetUser(Some(user)));
        self.bridge();

        let loaded = self.client.initialize(&user_id, &role).await;
        match &loaded {
            Some(resp) => self.apply(&AppAction::LoadInitialData(resp.clone())),
            None => self.apply(&AppAction::SetLoading(false)),
        };
        info!(user_id = %user_id, role = %role, loaded = loaded.is_some(), "session started");
        loaded
    }

    pub fn end_session(&self) {
        self.client.cleanup();
        self.apply(&AppAction::SetUser(None));
        debug!("session ended");
    }

    /// Replaces any bridge left from an earlier session, so each client
    /// event reaches the state once.
    fn bridge(&self) {
        let mut bridged = self.bridged.lock();
        for (kind, id) in bridged.drain(..) {
            self.client.unsubscribe(kind, id);
        }
        for kind in SyncEventKind::ALL {
            let state = self.state.clone();
            let id = self.client.subscribe(kind, move |event| {
                for action in bridge_actions(event) {
                    apply_to(&state, &action);
                }
                Ok(())
            });
            bridged.push((kind, id));
        }
    }

    async fn run(&self, effect: &Effect) -> bool {
        match effect {
            Effect::AddEvent(event) => self.client.add_event(event.clone()).await.is_confirmed(),
            Effect::UpdateEvent { id, updates } => self
                .client
                .update_event(id.clone(), updates.clone())
                .await
                .is_confirmed(),
            Effect::AddReport(report) => self.client.add_report(report.clone()).await.is_confirmed(),
            Effect::UpdateReport { id, updates } => self
                .client
                .update_report(id.clone(), updates.clone())
                .await
                .is_confirmed(),
            Effect::SyncEvents(events) => self.client.sync_events(events.clone()).await.is_confirmed(),
        }
    }
}

fn apply_to(state: &RwLock<AppState>, action: &AppAction) -> Vec<Effect> {
    let mut guard = state.write();
    let next = reduce(&guard, action);
    let effects = plan_effects(action, &next);
    *guard = next;
    effects
}

/// The reducer actions a client event turns into.
pub fn bridge_actions(event: &SyncEvent) -> Vec<AppAction> {
    match event {
        SyncEvent::EventsLoaded(batch) | SyncEvent::EventsUpdated(batch) => {
            vec![AppAction::SyncEvents {
                events: batch.records.clone(),
                last_sync: batch.as_of,
            }]
        }
        SyncEvent::ReportsLoaded(batch) | SyncEvent::ReportsUpdated(batch) => {
            vec![AppAction::SyncReports {
                reports: batch.records.clone(),
                last_sync: batch.as_of,
            }]
        }
        SyncEvent::NotificationsLoaded(batch) => {
            vec![AppAction::SetNotifications(batch.records.clone())]
        }
        SyncEvent::NotificationsReceived(batch) => batch
            .records
            .iter()
            .cloned()
            .map(AppAction::AddNotification)
            .collect(),
        SyncEvent::EventAdded(event) => vec![AppAction::UpsertGlobalEvent(event.clone())],
        SyncEvent::ReportAdded(report) => vec![AppAction::UpsertGlobalReport(report.clone())],
        SyncEvent::EventUpdated { id, updates } => vec![AppAction::PatchGlobalEvent {
            id: id.clone(),
            updates: updates.clone(),
        }],
        SyncEvent::ReportUpdated { id, updates } => vec![AppAction::PatchGlobalReport {
            id: id.clone(),
            updates: updates.clone(),
        }],
        SyncEvent::ConnectivityChanged(online) => vec![AppAction::SetOnlineStatus(*online)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::error::ClientError;
    use crate::events::Batch;
    use crate::mock::{MockRequest, MockTransport};
    use civic_core::record::{CollectionSet, RecordId};
    use civic_core::wire::{EventAction, EventsWriteResponse, UpdatesResponse};
    use serde_json::json;
    use std::time::Duration;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn store(transport: &Arc<MockTransport>) -> AppStore {
        let client = SyncClient::new(
            transport.clone(),
            ClientConfig {
                poll_interval: Duration::from_secs(3),
                snapshot_path: None,
            },
        );
        AppStore::new(client)
    }

    fn seed_load() -> LoadResponse {
        LoadResponse {
            collections: CollectionSet {
                events: vec![
                    record(json!({"id": 1, "participants": 45})),
                    record(json!({"id": 2, "participants": 23})),
                ],
                reports: vec![record(json!({"id": 1, "status": "investigating"}))],
                notifications: Vec::new(),
            },
            timestamp: 1_000,
        }
    }

    #[tokio::test]
    async fn start_session_loads_into_state() {
        let transport = Arc::new(MockTransport::new());
        transport.push_load(Ok(seed_load()));
        let app = store(&transport);

        app.start_session(record(json!({"id": "u-1", "role": "volunteer"})))
            .await
            .unwrap();
        let state = app.state();
        assert_eq!(state.global_events.len(), 2);
        assert_eq!(state.global_reports.len(), 1);
        assert_eq!(state.last_sync, 1_000);
        assert!(!state.is_loading);
        assert_eq!(app.client().session().unwrap().user_id, "u-1");
        app.end_session();
    }

    #[tokio::test]
    async fn failed_load_stops_loading() {
        let transport = Arc::new(MockTransport::new());
        transport.push_load(Err(ClientError::Network("refused".into())));
        let app = store(&transport);

        assert!(app.start_session(record(json!({"id": "u-1"}))).await.is_none());
        let state = app.state();
        assert!(!state.is_loading);
        assert!(!state.is_online);
        assert!(state.global_events.is_empty());
        app.end_session();
    }

    #[tokio::test]
    async fn register_syncs_only_the_touched_event() {
        let transport = Arc::new(MockTransport::new());
        transport.push_load(Ok(seed_load()));
        let app = store(&transport);
        app.start_session(record(json!({"id": "u-1"}))).await;

        let touched = record(json!({"id": 2, "participants": 24}));
        let merged = vec![
            record(json!({"id": 1, "participants": 45, "lastModified": 1_100})),
            record(json!({"id": 2, "participants": 24, "lastModified": 1_100})),
        ];
        transport.push_events(Ok(EventsWriteResponse {
            event: None,
            events: merged.clone(),
        }));

        let results = app
            .dispatch(AppAction::RegisterEvent { event_id: RecordId::Int(2) })
            .await;
        assert_eq!(
            results,
            vec![EffectResult {
                effect: Effect::SyncEvents(vec![touched.clone()]),
                confirmed: true
            }]
        );
        assert!(transport.requests().contains(&MockRequest::Events(EventAction::Sync {
            events: Some(vec![touched])
        })));
        assert_eq!(app.state().global_events, merged);
        app.end_session();
    }

    #[tokio::test]
    async fn confirmed_add_lands_through_the_bridge() {
        let transport = Arc::new(MockTransport::new());
        transport.push_load(Ok(seed_load()));
        let app = store(&transport);
        app.start_session(record(json!({"id": "u-1"}))).await;

        let created = record(json!({"id": 1_700, "title": "Cleanup", "lastModified": 1_200}));
        transport.push_events(Ok(EventsWriteResponse {
            event: Some(created.clone()),
            events: Vec::new(),
        }));
        app.dispatch(AppAction::AddGlobalEvent(record(json!({"title": "Cleanup"}))))
            .await;

        let events = app.state().global_events;
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], created);
        app.end_session();
    }

    #[tokio::test]
    async fn unconfirmed_add_leaves_state_alone() {
        let transport = Arc::new(MockTransport::new());
        transport.push_load(Ok(seed_load()));
        let app = store(&transport);
        app.start_session(record(json!({"id": "u-1"}))).await;
        let before = app.state().global_events;

        let results = app
            .dispatch(AppAction::AddGlobalEvent(record(json!({"title": "Lost"}))))
            .await;
        assert!(!results[0].confirmed);
        assert_eq!(app.state().global_events, before);
        app.end_session();
    }

    #[tokio::test]
    async fn polled_notifications_are_prepended() {
        let transport = Arc::new(MockTransport::new());
        transport.push_load(Ok(seed_load()));
        transport.push_updates(Ok(UpdatesResponse {
            has_updates: true,
            notifications: vec![record(json!({"id": "ntf_1"})), record(json!({"id": "ntf_2"}))],
            timestamp: 2_000,
            ..Default::default()
        }));
        let app = store(&transport);
        app.start_session(record(json!({"id": "u-1"}))).await;

        app.client().poll_once().await;
        let state = app.state();
        assert_eq!(state.notifications.len(), 2);
        assert_eq!(state.notifications[0].get_str("id"), Some("ntf_2"));
        app.end_session();
    }

    #[tokio::test]
    async fn end_session_stops_bridging() {
        let transport = Arc::new(MockTransport::new());
        let app = store(&transport);
        app.start_session(record(json!({"id": "u-1"}))).await;
        app.end_session();

        app.client().notify(&SyncEvent::EventAdded(record(json!({"id": 9}))));
        let state = app.state();
        assert!(state.global_events.is_empty());
        assert!(state.user.is_none());
    }

    #[tokio::test]
    async fn restarting_a_session_bridges_once() {
        let transport = Arc::new(MockTransport::new());
        let app = store(&transport);
        app.start_session(record(json!({"id": "u-1"}))).await;
        app.start_session(record(json!({"id": "u-1"}))).await;
        assert_eq!(app.client().subscriber_count(SyncEventKind::NotificationsReceived), 1);

        app.client().notify(&SyncEvent::NotificationsReceived(Batch {
            records: vec![record(json!({"id": "ntf_1"}))],
            as_of: 5,
        }));
        assert_eq!(app.state().notifications.len(), 1);

        app.end_session();
        app.start_session(record(json!({"id": "u-2"}))).await;
        assert_eq!(app.client().subscriber_count(SyncEventKind::EventAdded), 1);
        app.end_session();
    }

    #[test]
    fn bridge_maps_batches_and_connectivity() {
        let batch = Batch {
            records: vec![record(json!({"id": 1}))],
            as_of: 77,
        };
        assert_eq!(
            bridge_actions(&SyncEvent::ReportsUpdated(batch.clone())),
            vec![AppAction::SyncReports {
                reports: batch.records.clone(),
                last_sync: 77
            }]
        );
        assert_eq!(
            bridge_actions(&SyncEvent::ConnectivityChanged(false)),
            vec![AppAction::SetOnlineStatus(false)]
        );
        assert!(bridge_actions(&SyncEvent::NotificationsReceived(Batch {
            records: Vec::new(),
            as_of: 1
        }))
        .is_empty());
    }
}
