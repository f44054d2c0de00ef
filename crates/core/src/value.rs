//! Field values carried by materialized entities
//!
//! This module defines:
//! - Value: the field value enum stored in an `EntityRecord`
//! - Timestamp: a wall-clock timestamp tagged with its `TimestampKind`
//!
//! ## Timestamp kinds
//!
//! Rows written by older clients frequently carry timestamps whose zone is
//! not recorded. Those come back as `TimestampKind::Unspecified` and are
//! coerced to the canonical kind by the materialization interceptor.

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the wall-clock part of a `Timestamp` should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampKind {
    /// Zone unknown; ambiguous until normalized
    #[default]
    Unspecified,
    /// Wall clock is UTC
    Utc,
    /// Wall clock is the process-local zone
    Local,
}

impl fmt::Display for TimestampKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampKind::Unspecified => write!(f, "unspecified"),
            TimestampKind::Utc => write!(f, "utc"),
            TimestampKind::Local => write!(f, "local"),
        }
    }
}

/// Wall-clock timestamp tagged with its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Wall-clock value
    pub value: NaiveDateTime,
    /// Interpretation of `value`
    pub kind: TimestampKind,
}

impl Timestamp {
    /// Create a timestamp with an explicit kind
    pub fn new(value: NaiveDateTime, kind: TimestampKind) -> Self {
        Self { value, kind }
    }

    /// Create a timestamp whose zone is unknown
    pub fn unspecified(value: NaiveDateTime) -> Self {
        Self::new(value, TimestampKind::Unspecified)
    }

    /// Current UTC time
    pub fn now_utc() -> Self {
        Self::new(Utc::now().naive_utc(), TimestampKind::Utc)
    }

    /// Relabel the timestamp without moving the wall clock
    pub fn specify_kind(self, kind: TimestampKind) -> Self {
        Self::new(self.value, kind)
    }

    /// Convert to `target`
    ///
    /// `Unspecified` values keep their wall clock and only take the new kind.
    /// `Local` and `Utc` values are shifted through the process-local zone.
    pub fn to_kind(self, target: TimestampKind) -> Self {
        match (self.kind, target) {
            (from, to) if from == to => self,
            (TimestampKind::Unspecified, to) => self.specify_kind(to),
            (_, TimestampKind::Unspecified) => self.specify_kind(TimestampKind::Unspecified),
            (TimestampKind::Local, TimestampKind::Utc) => {
                let value = Local
                    .from_local_datetime(&self.value)
                    .earliest()
                    .map(|dt| dt.naive_utc())
                    .unwrap_or(self.value);
                Self::new(value, TimestampKind::Utc)
            }
            (TimestampKind::Utc, TimestampKind::Local) => {
                let value = Utc.from_utc_datetime(&self.value).with_timezone(&Local);
                Self::new(value.naive_local(), TimestampKind::Local)
            }
            (_, to) => self.specify_kind(to),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.kind)
    }
}

/// Field value of a persisted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Timestamp with its kind
    Timestamp(Timestamp),
}

impl Value {
    /// Returns true if this is a Null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as timestamp if this is a Timestamp value
    pub fn as_timestamp(&self) -> Option<&Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// Storage identity: like `==`, but floats compare by bit pattern
    ///
    /// `NaN` is the same as itself and `-0.0` differs from `0.0`, so a value
    /// read back unchanged is never reported as an edit.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts)
    }
}
