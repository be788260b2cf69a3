use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use civic_core::record::Record;
use civic_core::wire::{
    BroadcastResponse, EventAction, EventsWriteResponse, LoadResponse, RegisterRequest,
    RegisterResponse, ReportAction, ReportsWriteResponse, UpdatesResponse, EVENTS_PATH,
    LOAD_PATH, NOTIFICATIONS_PATH, REGISTER_PATH, REPORTS_PATH, UPDATES_PATH,
};

use crate::error::ClientError;

/// The gateway operations a [`SyncClient`](crate::SyncClient) needs.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn load(&self) -> Result<LoadResponse, ClientError>;

    async fn updates(&self, since: i64) -> Result<UpdatesResponse, ClientError>;

    async fn post_events(&self, action: &EventAction) -> Result<EventsWriteResponse, ClientError>;

    async fn post_reports(&self, action: &ReportAction)
        -> Result<ReportsWriteResponse, ClientError>;

    async fn register_user(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError>;

    async fn broadcast(&self, notification: &Record) -> Result<BroadcastResponse, ClientError>;
}

/// JSON over HTTP via `reqwest`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// `timeout` bounds whole requests, connecting included. `None` leaves
    /// them unbounded.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, body));
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<LoadResponse, ClientError> {
        let resp = self.client.get(self.url(LOAD_PATH)).send().await?;
        Self::decode(resp).await
    }

    #[instrument(skip(self))]
    async fn updates(&self, since: i64) -> Result<UpdatesResponse, ClientError> {
        let resp = self
            .client
            .get(self.url(UPDATES_PATH))
            .query(&[("since", since)])
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post_events(&self, action: &EventAction) -> Result<EventsWriteResponse, ClientError> {
        self.post(EVENTS_PATH, action).await
    }

    async fn post_reports(
        &self,
        action: &ReportAction,
    ) -> Result<ReportsWriteResponse, ClientError> {
        self.post(REPORTS_PATH, action).await
    }

    async fn register_user(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.post(REGISTER_PATH, req).await
    }

    async fn broadcast(&self, notification: &Record) -> Result<BroadcastResponse, ClientError> {
        self.post(NOTIFICATIONS_PATH, notification).await
    }
}
