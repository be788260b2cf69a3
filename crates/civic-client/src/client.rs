use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use civic_core::ids::SessionId;
use civic_core::record::{CollectionKind, Record, RecordId};
use civic_core::settings::{ClientSettings, MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS};
use civic_core::wire::{EventAction, LoadResponse, RegisterRequest, ReportAction, WriteAction};

use crate::error::ClientError;
use crate::cursor::SyncCursor;
use crate::events::{
    Batch, DeliveryReport, SubscriberRegistry, SubscriptionId, SyncEvent, SyncEventKind,
};
use crate::snapshot::SnapshotFile;
use crate::transport::{HttpTransport, SyncTransport};

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub poll_interval: Duration,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            snapshot_path: None,
        }
    }
}

impl ClientConfig {
    /// Poll interval pulled into the accepted range.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.clamp(
            Duration::from_millis(MIN_POLL_INTERVAL_MS),
            Duration::from_millis(MAX_POLL_INTERVAL_MS),
        )
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            snapshot_path: settings.snapshot_path.as_ref().map(PathBuf::from),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    Uninitialized,
    Polling,
    Stopped,
}

/// Result of an outbound write.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome<T> {
    /// The gateway accepted the write; carries what it returned.
    Confirmed(T),
    /// The write did not go through; carries the caller's data.
    Unconfirmed(T),
}

impl<T> SyncOutcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Confirmed(v) | Self::Unconfirmed(v) => v,
        }
    }
}

/// What a single poll did.
#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// Changes were published and the cursor moved to `cursor`.
    Updated { cursor: i64 },
    Unchanged,
    Failed(ClientError),
    /// The client was cleaned up while the request was in flight.
    Discarded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user_id: String,
    pub role: String,
}

/// Which collection endpoint a write goes to.
#[derive(Clone, Copy, Debug)]
enum Target {
    Events,
    Reports,
}

impl Target {
    fn kind(self) -> CollectionKind {
        match self {
            Self::Events => CollectionKind::Events,
            Self::Reports => CollectionKind::Reports,
        }
    }

    fn added(self, record: Record) -> SyncEvent {
        match self {
            Self::Events => SyncEvent::EventAdded(record),
            Self::Reports => SyncEvent::ReportAdded(record),
        }
    }

    fn updated(self, id: RecordId, updates: Record) -> SyncEvent {
        match self {
            Self::Events => SyncEvent::EventUpdated { id, updates },
            Self::Reports => SyncEvent::ReportUpdated { id, updates },
        }
    }

    fn synced(self, batch: Batch) -> SyncEvent {
        match self {
            Self::Events => SyncEvent::EventsUpdated(batch),
            Self::Reports => SyncEvent::ReportsUpdated(batch),
        }
    }
}

struct Poller {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn SyncTransport>,
    config: ClientConfig,
    subscribers: SubscriberRegistry,
    cursor: SyncCursor,
    online: AtomicBool,
    phase: Mutex<ClientPhase>,
    poller: Mutex<Option<Poller>>,
    session: Mutex<Option<SessionInfo>>,
    snapshot: Option<SnapshotFile>,
}

/// Per-session poller that keeps a local view in step with the gateway.
///
/// Cloning is cheap; clones share the cursor, subscribers and poller.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

impl SyncClient {
    /// The saved snapshot, if any, seeds the cursor. An out-of-range poll
    /// interval is clamped.
    pub fn new(transport: Arc<dyn SyncTransport>, mut config: ClientConfig) -> Self {
        let interval = config.effective_poll_interval();
        if interval != config.poll_interval {
            warn!(
                requested_ms = config.poll_interval.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "poll interval out of range, clamped"
            );
            config.poll_interval = interval;
        }

        let snapshot = config.snapshot_path.as_ref().map(SnapshotFile::new);
        let start = snapshot
            .as_ref()
            .and_then(SnapshotFile::load)
            .map_or(0, |s| s.last_sync);

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                subscribers: SubscriberRegistry::new(),
                cursor: SyncCursor::new(start),
                online: AtomicBool::new(true),
                phase: Mutex::new(ClientPhase::Uninitialized),
                poller: Mutex::new(None),
                session: Mutex::new(None),
                snapshot,
            }),
        }
    }

    /// Client talking HTTP to `settings.base_url`.
    pub fn connect(settings: &ClientSettings) -> Result<Self, ClientError> {
        let timeout = settings.request_timeout_ms.map(Duration::from_millis);
        let transport = HttpTransport::new(&settings.base_url, timeout)?;
        Ok(Self::new(Arc::new(transport), ClientConfig::from(settings)))
    }

    pub fn subscribe<F>(&self, kind: SyncEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, kind: SyncEventKind, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(kind, id)
    }

    pub fn subscriber_count(&self, kind: SyncEventKind) -> usize {
        self.inner.subscribers.subscriber_count(kind)
    }

    /// Deliver `event` to local subscribers only.
    pub fn notify(&self, event: &SyncEvent) -> DeliveryReport {
        self.inner.subscribers.notify(event)
    }

    pub fn phase(&self) -> ClientPhase {
        *self.inner.phase.lock()
    }

    pub fn last_sync(&self) -> i64 {
        self.inner.cursor.get()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.inner.session.lock().clone()
    }

    /// Register the user with the gateway, load everything once, publish
    /// it, then start polling. A failed registration or load is logged and
    /// polling starts anyway. Calling this again restarts the cycle.
    pub async fn initialize(&self, user_id: &str, role: &str) -> Option<LoadResponse> {
        self.stop_polling();

        let session = SessionInfo {
            id: SessionId::new(),
            user_id: user_id.to_string(),
            role: role.to_string(),
        };
        info!(session = %session.id, user_id, role, "sync session starting");
        *self.inner.session.lock() = Some(session);
        self.inner.register(user_id, role).await;

        let loaded = match self.inner.transport.load().await {
            Ok(resp) => {
                self.inner.mark_reachable();
                self.inner.publish_load(&resp);
                Some(resp)
            }
            Err(e) => {
                self.inner.mark_failure(&e);
                warn!(error = %e, error_kind = e.error_kind(), "initial load failed");
                None
            }
        };

        self.start_polling();
        loaded
    }

    /// Run one poll now, outside the timer.
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll(None).await
    }

    /// Stop polling and drop every subscriber. A request already in flight
    /// finishes but its result is discarded.
    pub fn cleanup(&self) {
        self.stop_polling();
        self.inner.subscribers.clear();
        *self.inner.phase.lock() = ClientPhase::Stopped;
        if let Some(session) = self.inner.session.lock().take() {
            info!(session = %session.id, "sync session stopped");
        }
    }

    pub async fn add_event(&self, event: Record) -> SyncOutcome<Record> {
        self.inner.add(Target::Events, event).await
    }

    pub async fn add_report(&self, report: Record) -> SyncOutcome<Record> {
        self.inner.add(Target::Reports, report).await
    }

    /// Confirmed with the merged record. Unconfirmed with `updates` when the
    /// request failed or no event has `id`.
    pub async fn update_event(&self, id: RecordId, updates: Record) -> SyncOutcome<Record> {
        self.inner.update(Target::Events, id, updates).await
    }

    pub async fn update_report(&self, id: RecordId, updates: Record) -> SyncOutcome<Record> {
        self.inner.update(Target::Reports, id, updates).await
    }

    /// Merge `events` into the gateway collection. Confirmed with the whole
    /// collection after the merge.
    pub async fn sync_events(&self, events: Vec<Record>) -> SyncOutcome<Vec<Record>> {
        self.inner.sync(Target::Events, events).await
    }

    pub async fn sync_reports(&self, reports: Vec<Record>) -> SyncOutcome<Vec<Record>> {
        self.inner.sync(Target::Reports, reports).await
    }

    /// Ask the gateway to store `notification` for every client. Confirmed
    /// with the stored notification, which other clients then see on their
    /// next poll.
    pub async fn broadcast_notification(&self, notification: Record) -> SyncOutcome<Record> {
        match self.inner.transport.broadcast(&notification).await {
            Ok(resp) => {
                self.inner.mark_reachable();
                debug!(id = ?resp.notification.id(), "notification broadcast");
                SyncOutcome::Confirmed(resp.notification)
            }
            Err(e) => {
                self.inner.mark_failure(&e);
                warn!(error = %e, error_kind = e.error_kind(), "broadcast not confirmed");
                SyncOutcome::Unconfirmed(notification)
            }
        }
    }

    fn start_polling(&self) {
        let token = CancellationToken::new();
        let period = self.inner.config.poll_interval;
        let task = tokio::spawn(poll_loop(
            Arc::downgrade(&self.inner),
            token.clone(),
            period,
        ));
        *self.inner.poller.lock() = Some(Poller { token, _task: task });
        *self.inner.phase.lock() = ClientPhase::Polling;
        debug!(interval_ms = period.as_millis() as u64, "polling started");
    }

    fn stop_polling(&self) {
        if let Some(poller) = self.inner.poller.lock().take() {
            poller.token.cancel();
        }
    }
}

async fn poll_loop(inner: Weak<Inner>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.poll(Some(&token)).await;
            }
        }
    }
    debug!("polling stopped");
}

impl Inner {
    async fn register(&self, user_id: &str, role: &str) {
        let req = RegisterRequest {
            user_id: user_id.to_string(),
            user_role: role.to_string(),
        };
        match self.transport.register_user(&req).await {
            Ok(_) => {
                self.mark_reachable();
                debug!(user_id, "registered with gateway");
            }
            Err(e) => {
                self.mark_failure(&e);
                warn!(user_id, error = %e, error_kind = e.error_kind(), "registration failed");
            }
        }
    }

    async fn poll(&self, token: Option<&CancellationToken>) -> PollOutcome {
        let since = self.cursor.get();
        let result = self.transport.updates(since).await;

        if token.is_some_and(CancellationToken::is_cancelled) {
            debug!(since, "discarding poll result after cleanup");
            return PollOutcome::Discarded;
        }

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.mark_failure(&e);
                warn!(since, error = %e, error_kind = e.error_kind(), "poll failed");
                return PollOutcome::Failed(e);
            }
        };
        self.mark_reachable();

        if !resp.has_updates {
            return PollOutcome::Unchanged;
        }

        let as_of = resp.timestamp;
        let batch = |records: &Vec<Record>| Batch {
            records: records.clone(),
            as_of,
        };
        if !resp.events.is_empty() {
            self.subscribers
                .notify(&SyncEvent::EventsUpdated(batch(&resp.events)));
        }
        if !resp.reports.is_empty() {
            self.subscribers
                .notify(&SyncEvent::ReportsUpdated(batch(&resp.reports)));
        }
        if !resp.notifications.is_empty() {
            self.subscribers
                .notify(&SyncEvent::NotificationsReceived(batch(&resp.notifications)));
        }

        let cursor = self.cursor.advance(as_of);
        debug!(
            since,
            cursor,
            events = resp.events.len(),
            reports = resp.reports.len(),
            notifications = resp.notifications.len(),
            "updates applied"
        );

        let mut changed: Vec<(CollectionKind, &[Record])> = Vec::new();
        if !resp.events.is_empty() {
            changed.push((CollectionKind::Events, resp.events.as_slice()));
        }
        if !resp.reports.is_empty() {
            changed.push((CollectionKind::Reports, resp.reports.as_slice()));
        }
        self.save_snapshot(&changed);

        PollOutcome::Updated { cursor }
    }

    fn publish_load(&self, resp: &LoadResponse) {
        let as_of = resp.timestamp;
        let set = &resp.collections;
        self.subscribers.notify(&SyncEvent::EventsLoaded(Batch {
            records: set.events.clone(),
            as_of,
        }));
        self.subscribers.notify(&SyncEvent::ReportsLoaded(Batch {
            records: set.reports.clone(),
            as_of,
        }));
        self.subscribers.notify(&SyncEvent::NotificationsLoaded(Batch {
            records: set.notifications.clone(),
            as_of,
        }));

        let cursor = self.cursor.advance(as_of);
        debug!(
            cursor,
            events = set.events.len(),
            reports = set.reports.len(),
            notifications = set.notifications.len(),
            "initial data loaded"
        );
        self.save_snapshot(&[
            (CollectionKind::Events, set.events.as_slice()),
            (CollectionKind::Reports, set.reports.as_slice()),
            (CollectionKind::Notifications, set.notifications.as_slice()),
        ]);
    }

    async fn send(
        &self,
        target: Target,
        action: WriteAction,
    ) -> Result<(Option<Record>, Vec<Record>), ClientError> {
        let result = match (target, action) {
            (Target::Events, WriteAction::Add(event)) => self
                .transport
                .post_events(&EventAction::Add { event })
                .await
                .map(|r| (r.event, r.events)),
            (Target::Events, WriteAction::Update { id, updates }) => self
                .transport
                .post_events(&EventAction::Update {
                    event_id: id,
                    updates,
                })
                .await
                .map(|r| (r.event, r.events)),
            (Target::Events, WriteAction::Sync(events)) => self
                .transport
                .post_events(&EventAction::Sync { events })
                .await
                .map(|r| (r.event, r.events)),
            (Target::Reports, WriteAction::Add(report)) => self
                .transport
                .post_reports(&ReportAction::Add { report })
                .await
                .map(|r| (r.report, r.reports)),
            (Target::Reports, WriteAction::Update { id, updates }) => self
                .transport
                .post_reports(&ReportAction::Update {
                    report_id: id,
                    updates,
                })
                .await
                .map(|r| (r.report, r.reports)),
            (Target::Reports, WriteAction::Sync(reports)) => self
                .transport
                .post_reports(&ReportAction::Sync { reports })
                .await
                .map(|r| (r.report, r.reports)),
        };

        match &result {
            Ok(_) => self.mark_reachable(),
            Err(e) => {
                self.mark_failure(e);
                warn!(
                    kind = %target.kind(),
                    error = %e,
                    error_kind = e.error_kind(),
                    "write not confirmed"
                );
            }
        }
        result
    }

    async fn add(&self, target: Target, record: Record) -> SyncOutcome<Record> {
        match self.send(target, WriteAction::Add(record.clone())).await {
            Ok((Some(created), _)) => {
                self.subscribers.notify(&target.added(created.clone()));
                SyncOutcome::Confirmed(created)
            }
            Ok((None, _)) => {
                warn!(kind = %target.kind(), "gateway accepted add without returning a record");
                SyncOutcome::Unconfirmed(record)
            }
            Err(_) => SyncOutcome::Unconfirmed(record),
        }
    }

    async fn update(&self, target: Target, id: RecordId, updates: Record) -> SyncOutcome<Record> {
        let action = WriteAction::Update {
            id: id.clone(),
            updates: updates.clone(),
        };
        match self.send(target, action).await {
            Ok((Some(merged), _)) => {
                self.subscribers.notify(&target.updated(id, updates));
                SyncOutcome::Confirmed(merged)
            }
            Ok((None, _)) => {
                debug!(kind = %target.kind(), id = %id, "update matched no record");
                SyncOutcome::Unconfirmed(updates)
            }
            Err(_) => SyncOutcome::Unconfirmed(updates),
        }
    }

    async fn sync(&self, target: Target, records: Vec<Record>) -> SyncOutcome<Vec<Record>> {
        match self.send(target, WriteAction::Sync(Some(records.clone()))).await {
            Ok((_, collection)) => {
                let as_of = self.cursor.get();
                self.subscribers.notify(&target.synced(Batch {
                    records: collection.clone(),
                    as_of,
                }));
                self.save_snapshot(&[(target.kind(), collection.as_slice())]);
                SyncOutcome::Confirmed(collection)
            }
            Err(_) => SyncOutcome::Unconfirmed(records),
        }
    }

    fn save_snapshot(&self, collections: &[(CollectionKind, &[Record])]) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        if let Err(e) = snapshot.update(collections, self.cursor.get()) {
            warn!(path = %snapshot.path().display(), error = %e, "failed to save snapshot");
        }
    }

    fn mark_reachable(&self) {
        self.set_online(true);
    }

    /// Only an unreachable gateway counts as going offline.
    fn mark_failure(&self, error: &ClientError) {
        if error.is_unreachable() {
            self.set_online(false);
        }
    }

    fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::AcqRel) != online {
            info!(online, "gateway connectivity changed");
            self.subscribers
                .notify(&SyncEvent::ConnectivityChanged(online));
        }
    }
}
