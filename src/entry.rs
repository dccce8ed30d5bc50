//! Stored Entry
//!
//! The JSON envelope every key holds: caller fields plus an optional
//! `_expires_at` timestamp.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

/// Field carrying the absolute expiry timestamp
pub const EXPIRES_AT_FIELD: &str = "_expires_at";
/// Field non-object payloads are wrapped under
pub const DATA_FIELD: &str = "data";
/// Field holding an items collection
pub const ITEMS_FIELD: &str = "items";

/// Expiry state decoded from a raw envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No `_expires_at` field, or a falsy one
    Never,
    /// Valid timestamp
    At(DateTime<Utc>),
    /// Field present but unreadable; never satisfies `now <= expires_at`
    Invalid,
}

/// Entry stored under one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredEntry {
    /// Caller fields, without `_expires_at`
    pub payload: Map<String, Value>,
    /// Absolute expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            expires_at: None,
        }
    }

    /// Normalize any value into an envelope; non-objects become `{data: v}`
    pub fn wrap(value: Value) -> Self {
        match value {
            Value::Object(payload) => Self::new(payload),
            other => {
                let mut payload = Map::new();
                payload.insert(DATA_FIELD.to_string(), other);
                Self::new(payload)
            }
        }
    }

    /// Decode a raw envelope, splitting off its expiry state
    pub(crate) fn decode(value: Value) -> (Self, Expiry) {
        let mut entry = Self::wrap(value);
        let expiry = match entry.payload.get(EXPIRES_AT_FIELD) {
            None => Expiry::Never,
            // Falsy markers mean no expiry and stay in the payload untouched
            Some(raw) if is_falsy(raw) => Expiry::Never,
            Some(raw) => match parse_timestamp(raw) {
                Some(at) => Expiry::At(at),
                None => Expiry::Invalid,
            },
        };
        if expiry != Expiry::Never {
            entry.payload.remove(EXPIRES_AT_FIELD);
        }
        if let Expiry::At(at) = expiry {
            entry.expires_at = Some(at);
        }
        (entry, expiry)
    }

    /// Decode a raw envelope, dropping an unreadable expiry field
    pub fn from_value(value: Value) -> Self {
        Self::decode(value).0
    }

    /// Encode to the stored JSON form
    pub fn to_value(&self) -> Value {
        let mut object = self.payload.clone();
        if let Some(at) = self.expires_at {
            object.insert(EXPIRES_AT_FIELD.to_string(), Value::String(format_timestamp(at)));
        }
        Value::Object(object)
    }

    /// True when there are no fields and no expiry
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.expires_at.is_none()
    }

    /// An entry is live up to and including its expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now > t).unwrap_or(false)
    }

    /// The `data` field of a wrapped payload
    pub fn data(&self) -> Option<&Value> {
        self.payload.get(DATA_FIELD)
    }

    pub fn into_data(mut self) -> Option<Value> {
        self.payload.remove(DATA_FIELD)
    }

    /// The items collection, if present and an array
    pub fn items(&self) -> Option<&Vec<Value>> {
        self.payload.get(ITEMS_FIELD).and_then(Value::as_array)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

impl From<Value> for StoredEntry {
    fn from(value: Value) -> Self {
        Self::wrap(value)
    }
}

impl From<StoredEntry> for Value {
    fn from(entry: StoredEntry) -> Self {
        entry.to_value()
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// JS-falsy values: null, false, 0, ""
fn is_falsy(raw: &Value) -> bool {
    match raw {
        Value::Null | Value::Bool(false) => true,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0 || f.is_nan()).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Accepts RFC 3339, offset-less ISO-8601 date-times and dates (as UTC),
/// or epoch milliseconds
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => parse_iso8601(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}
