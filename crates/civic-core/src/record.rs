//! Records, ids and collection kinds shared by the store, gateway and client.
//!
//! A [`Record`] is an ordered JSON object. The sync layer only ever reads two
//! fields from it, `id` and the collection's freshness marker; everything
//! else is opaque payload that is carried and shallow-merged untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "id";
pub const LAST_MODIFIED_FIELD: &str = "lastModified";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Identifier of a record within its collection.
///
/// Integer `1` and string `"1"` are different ids: matching is strict, the
/// same way the wire format compares them.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// One event, report or notification.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build a record from a JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn id(&self) -> Option<RecordId> {
        self.0.get(ID_FIELD).and_then(RecordId::from_value)
    }

    pub fn set_id(&mut self, id: &RecordId) {
        self.0.insert(ID_FIELD.to_owned(), id.to_value());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Set a field, returning `self` for chaining in builders and tests.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Freshness marker for `kind`. A missing or non-integer marker reads as 0.
    pub fn freshness(&self, kind: CollectionKind) -> i64 {
        self.get_i64(kind.freshness_field()).unwrap_or(0)
    }

    pub fn stamp(&mut self, kind: CollectionKind, ms: i64) {
        self.set(kind.freshness_field(), ms);
    }

    /// Shallow merge: every top-level field of `other` overwrites ours.
    /// Nested objects are replaced, never merged.
    pub fn merge_from(&mut self, other: &Record) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The three synchronized collections.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Events,
    Reports,
    Notifications,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 3] = [Self::Events, Self::Reports, Self::Notifications];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Reports => "reports",
            Self::Notifications => "notifications",
        }
    }

    /// Field name used for one record in write requests and responses.
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Events => "event",
            Self::Reports => "report",
            Self::Notifications => "notification",
        }
    }

    pub fn freshness_field(&self) -> &'static str {
        match self {
            Self::Events | Self::Reports => LAST_MODIFIED_FIELD,
            Self::Notifications => TIMESTAMP_FIELD,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Events => "events.json",
            Self::Reports => "reports.json",
            Self::Notifications => "notifications.json",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Events => 0,
            Self::Reports => 1,
            Self::Notifications => 2,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CollectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Self::Events),
            "reports" => Ok(Self::Reports),
            "notifications" => Ok(Self::Notifications),
            other => Err(format!("unknown collection: {other}")),
        }
    }
}

/// All three collections, as returned by a full load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSet {
    #[serde(default)]
    pub events: Vec<Record>,
    #[serde(default)]
    pub reports: Vec<Record>,
    #[serde(default)]
    pub notifications: Vec<Record>,
}

impl CollectionSet {
    pub fn get(&self, kind: CollectionKind) -> &[Record] {
        match kind {
            CollectionKind::Events => &self.events,
            CollectionKind::Reports => &self.reports,
            CollectionKind::Notifications => &self.notifications,
        }
    }

    pub fn get_mut(&mut self, kind: CollectionKind) -> &mut Vec<Record> {
        match kind {
            CollectionKind::Events => &mut self.events,
            CollectionKind::Reports => &mut self.reports,
            CollectionKind::Notifications => &mut self.notifications,
        }
    }
}

/// Position of the record with `id` in `records`.
pub fn position_of(records: &[Record], id: &RecordId) -> Option<usize> {
    records.iter().position(|r| r.id().as_ref() == Some(id))
}
