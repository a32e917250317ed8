//! INSERT and UPDATE fragment generation.

use super::{bind_value, QueryError};
use crate::model::{ModelDefinition, ModelRegistry};
use crate::value::{Arguments, Record, SqlValue};
use serde_json::Value;

/// Column assignments for one row, in emission order.
pub type Assignments = Vec<(String, SqlValue)>;

/// Apply defaults, auto-timestamps and null coercion to `props`.
///
/// Caller properties keep their order; attributes filled in here are appended
/// in declaration order. Values are bound according to their attribute type,
/// so json attributes are already serialized to text.
pub fn apply_defaults(model: &ModelDefinition, props: &Record, creating: bool) -> Assignments {
    let mut values = props.clone();
    let mut pending = Vec::new();

    for (name, spec) in model.attributes() {
        if spec.auto_increment {
            continue;
        }
        let absent = !values.contains_key(name);
        if creating && absent {
            if let Some(default) = &spec.defaults_to {
                values.insert(name.to_string(), default.clone());
            }
        }

        let still_absent = !values.contains_key(name);
        let explicit_null = values.get(name).is_some_and(Value::is_null);
        if !((creating && still_absent) || explicit_null) {
            continue;
        }

        if spec.auto_created_at {
            if creating {
                values.insert(name.to_string(), Value::Null);
                pending.push(name);
            }
        } else if spec.auto_updated_at {
            values.insert(name.to_string(), Value::Null);
            pending.push(name);
        } else if let Some(zero) = spec.zero_value() {
            values.insert(name.to_string(), zero);
        }
    }

    values
        .into_iter()
        .map(|(name, value)| {
            let bound = if pending.contains(&name.as_str()) {
                SqlValue::PendingTimestamp
            } else {
                bind_value(model.attribute(&name), &value)
            };
            (name, bound)
        })
        .collect()
}

/// Column list and VALUES tuples for a multi-row insert.
///
/// Every row must assign the same set of columns; rows are emitted in the
/// column order of the first row. A single row with no columns yields
/// `DEFAULT VALUES`.
pub fn build_insert(
    registry: &ModelRegistry,
    rows: Vec<Assignments>,
    args: &mut Arguments,
) -> Result<String, QueryError> {
    let first = match rows.first() {
        Some(first) => first,
        None => return Err(QueryError::InvalidArgument("no rows to insert".to_string())),
    };
    let columns: Vec<String> = first.iter().map(|(name, _)| name.clone()).collect();

    if columns.is_empty() {
        if rows.len() == 1 {
            return Ok("DEFAULT VALUES".to_string());
        }
        return Err(QueryError::InvalidArgument(
            "cannot insert several rows without any columns".to_string(),
        ));
    }

    let mut tuples = Vec::with_capacity(rows.len());
    for (index, mut row) in rows.into_iter().enumerate() {
        if row.len() != columns.len() {
            return Err(mismatched_row(index));
        }
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            let position = row
                .iter()
                .position(|(name, _)| name == column)
                .ok_or_else(|| mismatched_row(index))?;
            let (_, value) = row.swap_remove(position);
            placeholders.push(args.push(value));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let quoted: Vec<String> = columns.iter().map(|c| registry.quote(c)).collect();
    Ok(format!("({}) VALUES {}", quoted.join(", "), tuples.join(", ")))
}

fn mismatched_row(index: usize) -> QueryError {
    QueryError::InvalidArgument(format!(
        "row {index} does not assign the same columns as the first row"
    ))
}

/// `SET` fragment for an update, or an empty string when nothing is assigned.
pub fn build_update_set(registry: &ModelRegistry, assignments: Assignments, args: &mut Arguments) -> String {
    if assignments.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = assignments
        .into_iter()
        .map(|(name, value)| format!("{} = {}", registry.quote(&name), args.push(value)))
        .collect();
    format!("SET {}", parts.join(", "))
}
