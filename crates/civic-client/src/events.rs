//! Change notifications published by the sync client and the registry
//! that delivers them to in-process subscribers.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use civic_core::record::{Record, RecordId};

/// Records delivered together, current as of the gateway time `as_of`.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub records: Vec<Record>,
    pub as_of: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    EventsLoaded(Batch),
    ReportsLoaded(Batch),
    NotificationsLoaded(Batch),
    EventsUpdated(Batch),
    ReportsUpdated(Batch),
    NotificationsReceived(Batch),
    EventAdded(Record),
    ReportAdded(Record),
    EventUpdated { id: RecordId, updates: Record },
    ReportUpdated { id: RecordId, updates: Record },
    ConnectivityChanged(bool),
}

impl SyncEvent {
    pub fn kind(&self) -> SyncEventKind {
        match self {
            Self::EventsLoaded(_) => SyncEventKind::EventsLoaded,
            Self::ReportsLoaded(_) => SyncEventKind::ReportsLoaded,
            Self::NotificationsLoaded(_) => SyncEventKind::NotificationsLoaded,
            Self::EventsUpdated(_) => SyncEventKind::EventsUpdated,
            Self::ReportsUpdated(_) => SyncEventKind::ReportsUpdated,
            Self::NotificationsReceived(_) => SyncEventKind::NotificationsReceived,
            Self::EventAdded(_) => SyncEventKind::EventAdded,
            Self::ReportAdded(_) => SyncEventKind::ReportAdded,
            Self::EventUpdated { .. } => SyncEventKind::EventUpdated,
            Self::ReportUpdated { .. } => SyncEventKind::ReportUpdated,
            Self::ConnectivityChanged(_) => SyncEventKind::ConnectivityChanged,
        }
    }
}

/// Names subscribers register under.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum SyncEventKind {
    EventsLoaded,
    ReportsLoaded,
    NotificationsLoaded,
    EventsUpdated,
    ReportsUpdated,
    NotificationsReceived,
    EventAdded,
    ReportAdded,
    EventUpdated,
    ReportUpdated,
    ConnectivityChanged,
}

impl SyncEventKind {
    pub const ALL: [SyncEventKind; 11] = [
        Self::EventsLoaded,
        Self::ReportsLoaded,
        Self::NotificationsLoaded,
        Self::EventsUpdated,
        Self::ReportsUpdated,
        Self::NotificationsReceived,
        Self::EventAdded,
        Self::ReportAdded,
        Self::EventUpdated,
        Self::ReportUpdated,
        Self::ConnectivityChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventsLoaded => "events-loaded",
            Self::ReportsLoaded => "reports-loaded",
            Self::NotificationsLoaded => "notifications-loaded",
            Self::EventsUpdated => "events-updated",
            Self::ReportsUpdated => "reports-updated",
            Self::NotificationsReceived => "notifications-received",
            Self::EventAdded => "event-added",
            Self::ReportAdded => "report-added",
            Self::EventUpdated => "event-updated",
            Self::ReportUpdated => "report-updated",
            Self::ConnectivityChanged => "connectivity-changed",
        }
    }
}

impl fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown sync event: {s}"))
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub type Handler = Arc<dyn Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync>;

/// How one `notify` call went.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Ordered handler lists keyed by event kind.
///
/// Handlers run synchronously, in registration order. A handler that
/// returns an error or panics is logged and counted; the rest still run.
#[derive(Default)]
pub struct SubscriberRegistry {
    handlers: DashMap<SyncEventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: SyncEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if `id` was not registered under `kind`.
    pub fn unsubscribe(&self, kind: SyncEventKind, id: SubscriptionId) -> bool {
        let Some(mut list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        before != list.len()
    }

    pub fn subscriber_count(&self, kind: SyncEventKind) -> usize {
        self.handlers.get(&kind).map_or(0, |list| list.len())
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub fn notify(&self, event: &SyncEvent) -> DeliveryReport {
        let kind = event.kind();
        // Snapshot the list so handlers may subscribe or unsubscribe freely.
        let handlers: Vec<(SubscriptionId, Handler)> = match self.handlers.get(&kind) {
            Some(list) => list.clone(),
            None => return DeliveryReport::default(),
        };

        let mut report = DeliveryReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(event = %kind, subscription = %id, error = %e, "subscriber failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        event = %kind,
                        subscription = %id,
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
