use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use civic_core::record::Record;
use civic_core::wire::{
    BroadcastResponse, EventAction, EventsWriteResponse, LoadResponse, RegisterRequest,
    RegisterResponse, ReportAction, ReportsWriteResponse, UpdatesResponse, UserPresence,
};

use crate::error::ClientError;
use crate::transport::SyncTransport;

/// A request seen by [`MockTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum MockRequest {
    Load,
    Updates { since: i64 },
    Events(EventAction),
    Reports(ReportAction),
    Register(RegisterRequest),
    Broadcast(Record),
}

/// Scripted transport for tests that should not open sockets.
///
/// Each operation pops the next scripted response. When nothing is
/// scripted, `load` returns empty collections, `updates` reports no changes
/// at `since`, registration succeeds, and writes fail with a network error.
#[derive(Default)]
pub struct MockTransport {
    loads: Mutex<VecDeque<Result<LoadResponse, ClientError>>>,
    updates: Mutex<VecDeque<Result<UpdatesResponse, ClientError>>>,
    events: Mutex<VecDeque<Result<EventsWriteResponse, ClientError>>>,
    reports: Mutex<VecDeque<Result<ReportsWriteResponse, ClientError>>>,
    registrations: Mutex<VecDeque<Result<RegisterResponse, ClientError>>>,
    broadcasts: Mutex<VecDeque<Result<BroadcastResponse, ClientError>>>,
    requests: Mutex<Vec<MockRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_load(&self, resp: Result<LoadResponse, ClientError>) -> &Self {
        self.loads.lock().push_back(resp);
        self
    }

    pub fn push_updates(&self, resp: Result<UpdatesResponse, ClientError>) -> &Self {
        self.updates.lock().push_back(resp);
        self
    }

    pub fn push_events(&self, resp: Result<EventsWriteResponse, ClientError>) -> &Self {
        self.events.lock().push_back(resp);
        self
    }

    pub fn push_reports(&self, resp: Result<ReportsWriteResponse, ClientError>) -> &Self {
        self.reports.lock().push_back(resp);
        self
    }

    pub fn push_register(&self, resp: Result<RegisterResponse, ClientError>) -> &Self {
        self.registrations.lock().push_back(resp);
        self
    }

    pub fn push_broadcast(&self, resp: Result<BroadcastResponse, ClientError>) -> &Self {
        self.broadcasts.lock().push_back(resp);
        self
    }

    /// Delay every `updates` call, to simulate a request still in flight.
    pub fn set_updates_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    pub fn update_polls(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, MockRequest::Updates { .. }))
            .count()
    }

    fn record(&self, request: MockRequest) {
        self.requests.lock().push(request);
    }
}

fn unscripted<T>() -> Result<T, ClientError> {
    Err(ClientError::Network("no scripted response".into()))
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn load(&self) -> Result<LoadResponse, ClientError> {
        self.record(MockRequest::Load);
        let next = self.loads.lock().pop_front();
        next.unwrap_or_else(|| Ok(LoadResponse::default()))
    }

    async fn updates(&self, since: i64) -> Result<UpdatesResponse, ClientError> {
        self.record(MockRequest::Updates { since });
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.updates.lock().pop_front();
        next.unwrap_or_else(|| {
            Ok(UpdatesResponse {
                has_updates: false,
                timestamp: since,
                ..Default::default()
            })
        })
    }

    async fn post_events(&self, action: &EventAction) -> Result<EventsWriteResponse, ClientError> {
        self.record(MockRequest::Events(action.clone()));
        let next = self.events.lock().pop_front();
        next.unwrap_or_else(unscripted)
    }

    async fn post_reports(
        &self,
        action: &ReportAction,
    ) -> Result<ReportsWriteResponse, ClientError> {
        self.record(MockRequest::Reports(action.clone()));
        let next = self.reports.lock().pop_front();
        next.unwrap_or_else(unscripted)
    }

    async fn register_user(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.record(MockRequest::Register(req.clone()));
        let next = self.registrations.lock().pop_front();
        next.unwrap_or_else(|| {
            Ok(RegisterResponse {
                success: true,
                user: UserPresence {
                    user_id: req.user_id.clone(),
                    user_role: req.user_role.clone(),
                    registered_at: 0,
                    last_seen: 0,
                },
            })
        })
    }

    async fn broadcast(&self, notification: &Record) -> Result<BroadcastResponse, ClientError> {
        self.record(MockRequest::Broadcast(notification.clone()));
        let next = self.broadcasts.lock().pop_front();
        next.unwrap_or_else(unscripted)
    }
}
