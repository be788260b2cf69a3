//! # civic-sync
//!
//! Runs the sync gateway, or a headless client that follows one.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use civic_client::{AppStore, ClientConfig, SyncClient, SyncEvent, SyncEventKind};
use civic_core::record::Record;
use civic_core::settings::{self, BackendKind, SyncSettings};
use civic_core::SystemClock;
use civic_gateway::{open_store, ServerConfig};
use civic_telemetry::{init_telemetry, TelemetryConfig};

/// Civic platform sync gateway and client.
#[derive(Parser, Debug)]
#[command(name = "civic-sync", about = "Civic platform sync gateway")]
struct Cli {
    /// Settings file (defaults to ~/.civic-sync/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the sync gateway.
    Serve {
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind.
        #[arg(long)]
        host: Option<String>,

        /// Directory for the file and sqlite backends.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Persistence backend: memory, file or sqlite.
        #[arg(long)]
        backend: Option<BackendKind>,
    },
    /// Follow a gateway and log every change it reports.
    Watch {
        /// Gateway base URL.
        #[arg(long)]
        url: Option<String>,

        /// Poll interval in milliseconds.
        #[arg(long)]
        interval_ms: Option<u64>,

        #[arg(long, default_value = "watcher")]
        user: String,

        #[arg(long, default_value = "user")]
        role: String,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<SyncSettings> {
    let path = path.cloned().unwrap_or_else(settings::settings_path);
    settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut settings = load_settings(args.settings.as_ref())?;

    let _telemetry = init_telemetry(TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ));

    match args.command {
        Command::Serve {
            port,
            host,
            data_dir,
            backend,
        } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(dir) = data_dir {
                settings.server.data_dir = dir.to_string_lossy().into_owned();
            }
            if let Some(backend) = backend {
                settings.server.backend = backend;
            }
            serve(&settings).await
        }
        Command::Watch {
            url,
            interval_ms,
            user,
            role,
        } => {
            if let Some(url) = url {
                settings.client.base_url = url;
            }
            if let Some(ms) = interval_ms {
                settings.client.poll_interval_ms = ms;
            }
            settings.validate().context("Invalid watch options")?;
            watch(&settings, user, role).await
        }
    }
}

async fn serve(settings: &SyncSettings) -> Result<()> {
    let server = &settings.server;
    let store = open_store(server, Arc::new(SystemClock::new()))
        .with_context(|| format!("Failed to open {} backend in {}", server.backend, server.data_dir))?;

    let handle = civic_gateway::start(ServerConfig::from(server), Arc::new(store))
        .await
        .with_context(|| format!("Failed to bind {}:{}", server.host, server.port))?;

    tracing::info!(
        "civic-sync listening on http://{} (backend: {})",
        handle.addr,
        server.backend
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn watch(settings: &SyncSettings, user: String, role: String) -> Result<()> {
    let client_settings = &settings.client;
    let timeout = client_settings.request_timeout_ms.map(Duration::from_millis);
    let transport = civic_client::HttpTransport::new(&client_settings.base_url, timeout)
        .context("Failed to build HTTP client")?;
    let client = SyncClient::new(Arc::new(transport), ClientConfig::from(client_settings));
    let app = AppStore::new(client);

    for kind in SyncEventKind::ALL {
        app.client().subscribe(kind, |event| {
            log_event(event);
            Ok(())
        });
    }

    let user = Record::new().with("id", user).with("role", role);
    let loaded = app.start_session(user).await;
    let state = app.state();
    tracing::info!(
        url = %client_settings.base_url,
        loaded = loaded.is_some(),
        events = state.global_events.len(),
        reports = state.global_reports.len(),
        notifications = state.notifications.len(),
        "watching gateway"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    let state = app.state();
    app.end_session();
    tracing::info!(
        last_sync = state.last_sync,
        events = state.global_events.len(),
        reports = state.global_reports.len(),
        "watch stopped"
    );
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::EventsLoaded(batch)
        | SyncEvent::ReportsLoaded(batch)
        | SyncEvent::NotificationsLoaded(batch)
        | SyncEvent::EventsUpdated(batch)
        | SyncEvent::ReportsUpdated(batch)
        | SyncEvent::NotificationsReceived(batch) => {
            tracing::info!(
                event = %event.kind(),
                count = batch.records.len(),
                as_of = batch.as_of,
                "sync"
            );
        }
        SyncEvent::EventAdded(record) | SyncEvent::ReportAdded(record) => {
            tracing::info!(event = %event.kind(), id = ?record.id(), "sync");
        }
        SyncEvent::EventUpdated { id, .. } | SyncEvent::ReportUpdated { id, .. } => {
            tracing::info!(event = %event.kind(), id = %id, "sync");
        }
        SyncEvent::ConnectivityChanged(online) => {
            tracing::info!(online, "gateway connectivity");
        }
    }
}
