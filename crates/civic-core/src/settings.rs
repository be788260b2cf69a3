//! Layered settings for the gateway, the client and logging.
//!
//! Loading flow:
//! 1. Start with compiled [`SyncSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `CIVIC_SYNC_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Accepted range for `client.pollIntervalMs`.
pub const MIN_POLL_INTERVAL_MS: u64 = 500;
pub const MAX_POLL_INTERVAL_MS: u64 = 600_000;

/// Persistence strategy behind the record store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[default]
    File,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "file" | "json" => Ok(Self::File),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(SettingsError::InvalidValue(format!(
                "unknown backend `{other}`; expected memory|file|sqlite"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub backend: BackendKind,
    /// Cap on stored notifications. `None` keeps every notification.
    pub max_notifications: Option<usize>,
    /// Return in-memory results instead of failing when a write cannot be persisted.
    pub swallow_write_errors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            data_dir: "sync-data".into(),
            backend: BackendKind::File,
            max_notifications: None,
            swallow_write_errors: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: Option<u64>,
    pub snapshot_path: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".into(),
            poll_interval_ms: 3000,
            request_timeout_ms: None,
            snapshot_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub server: ServerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

impl SyncSettings {
    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        let interval = self.client.poll_interval_ms;
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&interval) {
            return Err(SettingsError::InvalidValue(format!(
                "pollIntervalMs {interval} is outside {MIN_POLL_INTERVAL_MS}..={MAX_POLL_INTERVAL_MS}"
            )));
        }
        if self.client.request_timeout_ms == Some(0) {
            return Err(SettingsError::InvalidValue(
                "requestTimeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Resolve the default settings file (`~/.civic-sync/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".civic-sync").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SyncSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or an out-of-range value, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<SyncSettings> {
    let defaults = serde_json::to_value(SyncSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SyncSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CIVIC_SYNC_*` overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut SyncSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Override logic with an injectable lookup, so tests never touch the
/// process environment.
pub fn apply_overrides(settings: &mut SyncSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("CIVIC_SYNC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_PORT", |s| parse_u64_range(s, 1, 65535)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = string("CIVIC_SYNC_DATA_DIR") {
        settings.server.data_dir = v;
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_BACKEND", |s| s.parse::<BackendKind>().ok()) {
        settings.server.backend = v;
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_MAX_NOTIFICATIONS", |s| {
        parse_u64_range(s, 1, 1_000_000)
    }) {
        settings.server.max_notifications = Some(v as usize);
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_SWALLOW_WRITE_ERRORS", parse_bool) {
        settings.server.swallow_write_errors = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = string("CIVIC_SYNC_URL") {
        settings.client.base_url = v;
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_POLL_INTERVAL_MS", |s| {
        parse_u64_range(s, MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS)
    }) {
        settings.client.poll_interval_ms = v;
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_REQUEST_TIMEOUT_MS", |s| {
        parse_u64_range(s, 100, 600_000)
    }) {
        settings.client.request_timeout_ms = Some(v);
    }
    if let Some(v) = string("CIVIC_SYNC_SNAPSHOT_PATH") {
        settings.client.snapshot_path = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("CIVIC_SYNC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&lookup, "CIVIC_SYNC_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(name)?;
    let result = parse(&raw);
    if result.is_none() {
        tracing::warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    result
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let s = SyncSettings::default();
        assert_eq!(s.server.port, 3001);
        assert_eq!(s.server.backend, BackendKind::File);
        assert_eq!(s.server.data_dir, "sync-data");
        assert_eq!(s.client.poll_interval_ms, 3000);
        assert!(s.server.max_notifications.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server, ServerSettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 4000, "backend": "sqlite"}, "client": {"pollIntervalMs": 5000}}"#,
        )
        .unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.server.port, 4000);
        assert_eq!(s.server.backend, BackendKind::Sqlite);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.client.poll_interval_ms, 5000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn zero_poll_interval_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"client": {"pollIntervalMs": 0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)), "got {err:?}");
    }

    #[test]
    fn validate_checks_client_bounds() {
        assert!(SyncSettings::default().validate().is_ok());

        let mut s = SyncSettings::default();
        s.client.poll_interval_ms = MAX_POLL_INTERVAL_MS + 1;
        assert!(s.validate().is_err());

        let mut s = SyncSettings::default();
        s.client.request_timeout_ms = Some(0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn deep_merge_skips_nulls_and_replaces_arrays() {
        let merged = deep_merge(
            json!({"a": {"x": 1, "y": 2}, "list": [1, 2], "keep": true}),
            json!({"a": {"y": 3}, "list": [9], "keep": null}),
        );
        assert_eq!(merged, json!({"a": {"x": 1, "y": 3}, "list": [9], "keep": true}));
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = SyncSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("CIVIC_SYNC_PORT", "8080"),
                ("CIVIC_SYNC_BACKEND", "memory"),
                ("CIVIC_SYNC_MAX_NOTIFICATIONS", "50"),
                ("CIVIC_SYNC_POLL_INTERVAL_MS", "5000"),
                ("CIVIC_SYNC_LOG_JSON", "yes"),
                ("CIVIC_SYNC_URL", "http://gateway:9000"),
            ]),
        );
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.backend, BackendKind::Memory);
        assert_eq!(s.server.max_notifications, Some(50));
        assert_eq!(s.client.poll_interval_ms, 5000);
        assert_eq!(s.client.base_url, "http://gateway:9000");
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = SyncSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("CIVIC_SYNC_PORT", "0"),
                ("CIVIC_SYNC_BACKEND", "postgres"),
                ("CIVIC_SYNC_POLL_INTERVAL_MS", "10"),
                ("CIVIC_SYNC_SWALLOW_WRITE_ERRORS", "maybe"),
                ("CIVIC_SYNC_HOST", ""),
            ]),
        );
        assert_eq!(s, SyncSettings::default());
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("JSON".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("db".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert!("redis".parse::<BackendKind>().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }
}
