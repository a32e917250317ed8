//! Bound argument values and the positional argument accumulator.
//!
//! Every fragment the compilers emit pushes its parameters through
//! [`Arguments`], which hands back the `$n` placeholder for the value it just
//! stored. Placeholder numbers therefore always match argument positions in
//! emission order.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A decoded result row (or a caller-supplied property map).
pub type Record = serde_json::Map<String, Value>;

/// Largest integer that survives a round trip through an IEEE-754 double.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// A positional statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
    /// A bound array, used for `= ANY($n)` membership tests.
    Array(Vec<SqlValue>),
    /// Placeholder for "now"; resolved once per statement execution.
    PendingTimestamp,
}

impl SqlValue {
    /// Convert a JSON value into a bind argument without schema knowledge.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(items) => SqlValue::Array(items.iter().map(SqlValue::from_json).collect()),
            Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    pub fn is_pending_timestamp(&self) -> bool {
        matches!(self, SqlValue::PendingTimestamp)
    }

    /// Replace a pending timestamp (at any depth) with `millis`.
    pub(crate) fn resolve_timestamp(&mut self, millis: i64) {
        match self {
            SqlValue::PendingTimestamp => *self = SqlValue::Int(millis),
            SqlValue::Array(items) => items.iter_mut().for_each(|v| v.resolve_timestamp(millis)),
            _ => {}
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

/// Append-only list of positional arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<SqlValue>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and return the placeholder that refers to it.
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<SqlValue> {
        self.values
    }

    pub fn has_pending_timestamp(&self) -> bool {
        self.values.iter().any(SqlValue::is_pending_timestamp)
    }

    /// Resolve every pending timestamp to the same instant.
    pub(crate) fn resolve_timestamps(&mut self, at: DateTime<Utc>) {
        let millis = at.timestamp_millis();
        for value in &mut self.values {
            value.resolve_timestamp(millis);
        }
    }
}

/// Source of "now" for timestamp resolution.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
