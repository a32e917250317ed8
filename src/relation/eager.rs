//! Single-level eager loading of `belongs_to` relations.
//!
//! Related records are loaded with a second statement after the primary one
//! settles, on the same connection:
//!
//! 1. Collect the foreign keys held in the populated attribute
//! 2. Fetch the target rows with one equality (single record) or one
//!    `= ANY($1)` (many records) lookup
//! 3. Replace each foreign key with its related record, or `null` when the
//!    key is null or unresolved
//!
//! This avoids one lookup per parent record.

use crate::executor::{Executor, StorageError};
use crate::model::{cast_row, AttributeSpec, AttributeType, ModelRegistry};
use crate::query::{bind_value, PopulatePlan};
use crate::value::{Arguments, Record, SqlValue};
use serde_json::Value;
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Key used to match foreign keys against related primary keys.
///
/// Numbers and strings compare by their textual form, so a foreign key
/// stored as `"7"` resolves to the record whose primary key is `7`.
fn merge_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Coerce a foreign key to the type of the target primary key.
///
/// Every element of one `= ANY($1)` array must bind as the same type.
/// `None` means the key cannot match any row of the target.
fn coerce_key(spec: Option<&AttributeSpec>, key: &Value) -> Option<Value> {
    match (spec.map(|s| s.kind), key) {
        (_, Value::Null) => None,
        (Some(AttributeType::Number), Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(Value::from)),
        (Some(AttributeType::String), Value::Number(n)) => Some(Value::String(n.to_string())),
        _ => Some(key.clone()),
    }
}

/// Populate `plan.attribute` on one record.
///
/// A null or absent foreign key sets the attribute to null without issuing
/// a lookup.
pub fn populate_one(
    conn: &dyn Executor,
    registry: &ModelRegistry,
    schema: Option<&str>,
    plan: &PopulatePlan,
    record: &mut Record,
) -> Result<(), StorageError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::populate_span(&plan.attribute).entered();

    let target = &plan.target;
    let pk = target.primary_key_name();
    let foreign_key = record
        .get(&plan.attribute)
        .and_then(|fk| coerce_key(target.attribute(pk), fk));
    let foreign_key = match foreign_key {
        Some(key) => key,
        None => {
            record.insert(plan.attribute.clone(), Value::Null);
            return Ok(());
        }
    };
    let mut args = Arguments::new();
    let sql = format!(
        "SELECT * FROM {} WHERE {} = {}",
        registry.table_ref(target, schema),
        registry.quote(pk),
        args.push(bind_value(target.attribute(pk), &foreign_key))
    );
    let result = conn.execute(&sql, args.as_slice())?;

    let related = result
        .rows
        .into_iter()
        .next()
        .map(|row| Value::Object(cast_row(target, row)))
        .unwrap_or(Value::Null);
    record.insert(plan.attribute.clone(), related);
    Ok(())
}

/// Populate `plan.attribute` across `records` with a single lookup.
pub fn populate_many(
    conn: &dyn Executor,
    registry: &ModelRegistry,
    schema: Option<&str>,
    plan: &PopulatePlan,
    records: &mut [Record],
) -> Result<(), StorageError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::populate_span(&plan.attribute).entered();

    let target = &plan.target;
    let pk = target.primary_key_name();

    let mut keys: Vec<SqlValue> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for record in records.iter() {
        let coerced = record
            .get(&plan.attribute)
            .and_then(|fk| coerce_key(target.attribute(pk), fk));
        if let Some(fk) = coerced {
            if let Some(key) = merge_key(&fk) {
                if seen.insert(key) {
                    keys.push(bind_value(target.attribute(pk), &fk));
                }
            }
        }
    }

    let mut related: HashMap<String, Record> = HashMap::new();
    if !keys.is_empty() {
        let mut args = Arguments::new();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ANY({})",
            registry.table_ref(target, schema),
            registry.quote(pk),
            args.push(SqlValue::Array(keys))
        );
        let result = conn.execute(&sql, args.as_slice())?;
        for row in result.rows {
            let row = cast_row(target, row);
            if let Some(key) = row.get(pk).and_then(merge_key) {
                related.insert(key, row);
            }
        }
    }

    log::debug!(
        "populated {} on {} records from {} related rows",
        plan.attribute,
        records.len(),
        related.len()
    );

    for record in records.iter_mut() {
        let value = record
            .get(&plan.attribute)
            .and_then(merge_key)
            .and_then(|key| related.get(&key).cloned())
            .map(Value::Object)
            .unwrap_or(Value::Null);
        record.insert(plan.attribute.clone(), value);
    }
    Ok(())
}
