//! Row casting.
//!
//! Rows come back from storage with whatever nulls the table holds. Casting
//! applies the model's null policy: non-nullable string, number and boolean
//! attributes read as their zero value, while JSON and relation attributes
//! are passed through untouched.

use super::ModelDefinition;
use crate::value::Record;
use chrono::DateTime;
use serde_json::Value;

/// Column names that always read back as epoch milliseconds.
const TIMESTAMP_COLUMNS: [&str; 2] = ["createdAt", "updatedAt"];

/// Cast one raw row into a record of `model`.
pub fn cast_row(model: &ModelDefinition, mut row: Record) -> Record {
    for (name, spec) in model.attributes() {
        let missing = row.get(name).map_or(true, Value::is_null);
        if missing {
            if let Some(zero) = spec.zero_value() {
                row.insert(name.to_string(), zero);
            }
        }
    }

    for column in TIMESTAMP_COLUMNS {
        if let Some(value) = row.get_mut(column) {
            *value = timestamp_to_number(value.take());
        }
    }

    row
}

fn timestamp_to_number(value: Value) -> Value {
    match value {
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Value::from(i)
            } else if let Ok(f) = s.parse::<f64>() {
                Value::from(f)
            } else if let Ok(t) = DateTime::parse_from_rfc3339(&s) {
                Value::from(t.timestamp_millis())
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}
