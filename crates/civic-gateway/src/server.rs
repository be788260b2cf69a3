use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use civic_core::clock::Clock;
use civic_core::settings::ServerSettings;
use civic_core::wire::{
    EVENTS_PATH, HEALTH_PATH, LOAD_PATH, NOTIFICATIONS_PATH, REGISTER_PATH, REPORTS_PATH,
    UPDATES_PATH, USERS_PATH,
};
use civic_store::{open_backend, RecordStore, StoreConfig, StoreError};

use crate::handlers;
use crate::users::UserRegistry;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<RecordStore>,
    pub users: Arc<UserRegistry>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            users: Arc::new(UserRegistry::new()),
            started_at: Instant::now(),
        }
    }
}

/// Build the record store described by `settings`.
pub fn open_store(
    settings: &ServerSettings,
    clock: Arc<dyn Clock>,
) -> Result<RecordStore, StoreError> {
    let backend = open_backend(settings.backend, Path::new(&settings.data_dir))?;
    let config = StoreConfig {
        max_notifications: settings.max_notifications,
        swallow_write_errors: settings.swallow_write_errors,
    };
    Ok(RecordStore::with_config(backend, clock, config))
}

/// Build the Axum router with all routes.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route(LOAD_PATH, get(handlers::load))
        .route(UPDATES_PATH, get(handlers::updates))
        .route(EVENTS_PATH, post(handlers::events))
        .route(REPORTS_PATH, post(handlers::reports))
        .route(NOTIFICATIONS_PATH, post(handlers::broadcast))
        .route(REGISTER_PATH, post(handlers::register_user))
        .route(USERS_PATH, get(handlers::users))
        .route(HEALTH_PATH, get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Port 0 picks a free port.
pub async fn start(config: ServerConfig, store: Arc<RecordStore>) -> Result<ServerHandle, std::io::Error> {
    let backend = store.backend_name();
    let state = GatewayState::new(store);
    let users = state.users.clone();
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, backend, "sync gateway started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "sync gateway stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        users,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    users: Arc<UserRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Base URL for clients on this machine.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Users registered with this gateway so far.
    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "gateway task ended abnormally");
        }
        tracing::info!(port = self.port, "sync gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::clock::SystemClock;
    use civic_core::settings::BackendKind;
    use civic_store::MemoryBackend;

    fn memory_store() -> Arc<RecordStore> {
        Arc::new(RecordStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(SystemClock::new()),
        ))
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(local_config(), memory_store()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("{}/health", handle.local_url());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let handle = start(local_config(), memory_store()).await.unwrap();
        let resp = reqwest::Client::new()
            .get(format!("{}/sync/load", handle.local_url()))
            .header("Origin", "http://example.org")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_listening() {
        let handle = start(local_config(), memory_store()).await.unwrap();
        let url = format!("{}/health", handle.local_url());
        handle.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: dir.path().to_string_lossy().into_owned(),
            backend: BackendKind::File,
            ..Default::default()
        };

        let store = Arc::new(open_store(&settings, Arc::new(SystemClock::new())).unwrap());
        let handle = start(ServerConfig::from(&settings), store).await.unwrap();
        let resp = reqwest::Client::new()
            .post(format!("{}/sync/events", handle.local_url()))
            .json(&serde_json::json!({"action": "add", "event": {"title": "Persisted"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        handle.shutdown().await;

        assert!(dir.path().join("events.json").exists());
        assert!(dir.path().join("notifications.json").exists());

        let store = open_store(&settings, Arc::new(SystemClock::new())).unwrap();
        let events = store.load(civic_core::CollectionKind::Events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].get_str("title"), Some("Persisted"));
    }

    #[test]
    fn config_from_settings() {
        let settings = ServerSettings {
            port: 4321,
            ..Default::default()
        };
        let config = ServerConfig::from(&settings);
        assert_eq!(config.port, 4321);
        assert_eq!(config.host, "0.0.0.0");
    }
}
