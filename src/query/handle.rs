use super::builder::Operation;
use super::{IntoCriteria, QueryBuilder, QueryError};
use crate::model::{ModelDefinition, ModelRegistry};
use crate::value::Record;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Entry point for operations on one registered model.
///
/// Handles are cheap to clone. Each operation returns a fresh
/// [`QueryBuilder`]; invalid arguments are reported when it is built.
#[derive(Clone)]
pub struct ModelHandle {
    registry: Arc<ModelRegistry>,
    model: Arc<ModelDefinition>,
    schema: Option<String>,
}

impl ModelHandle {
    pub(crate) fn new(registry: Arc<ModelRegistry>, model: Arc<ModelDefinition>) -> Self {
        let schema = registry.default_schema().map(str::to_string);
        Self {
            registry,
            model,
            schema,
        }
    }

    /// Qualify every table reference (population included) with `schema`.
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.model
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    fn builder<'c>(&self, operation: Result<Operation, QueryError>) -> QueryBuilder<'c> {
        QueryBuilder::new(
            self.registry.clone(),
            self.model.clone(),
            self.schema.clone(),
            operation,
        )
    }

    pub fn find<'c>(&self, criteria: impl IntoCriteria) -> QueryBuilder<'c> {
        self.builder(criteria.into_criteria().map(Operation::Find))
    }

    /// At most one record; more than one match fails with `AmbiguousMatch`.
    pub fn find_one<'c>(&self, criteria: impl IntoCriteria) -> QueryBuilder<'c> {
        self.builder(criteria.into_criteria().map(Operation::FindOne))
    }

    pub fn count<'c>(&self, criteria: impl IntoCriteria) -> QueryBuilder<'c> {
        self.builder(criteria.into_criteria().map(Operation::Count))
    }

    pub fn create<'c>(&self, props: Value) -> QueryBuilder<'c> {
        self.builder(into_record(props).map(|row| Operation::Create {
            rows: vec![row],
            many: false,
        }))
    }

    /// Insert several rows with one statement; they share auto-timestamps.
    pub fn create_each<'c>(&self, rows: Vec<Value>) -> QueryBuilder<'c> {
        let rows = rows.into_iter().map(into_record).collect::<Result<Vec<_>, _>>();
        self.builder(rows.map(|rows| Operation::Create { rows, many: true }))
    }

    pub fn update<'c>(&self, criteria: impl IntoCriteria, props: Value) -> QueryBuilder<'c> {
        self.builder(update(criteria, props, false))
    }

    pub fn update_one<'c>(&self, criteria: impl IntoCriteria, props: Value) -> QueryBuilder<'c> {
        self.builder(update(criteria, props, true))
    }

    pub fn destroy<'c>(&self, criteria: impl IntoCriteria) -> QueryBuilder<'c> {
        self.builder(
            criteria
                .into_criteria()
                .map(|criteria| Operation::Destroy { criteria, single: false }),
        )
    }

    pub fn destroy_one<'c>(&self, criteria: impl IntoCriteria) -> QueryBuilder<'c> {
        self.builder(
            criteria
                .into_criteria()
                .map(|criteria| Operation::Destroy { criteria, single: true }),
        )
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model.display_name())
            .field("schema", &self.schema)
            .finish()
    }
}

fn update(criteria: impl IntoCriteria, props: Value, single: bool) -> Result<Operation, QueryError> {
    Ok(Operation::Update {
        criteria: criteria.into_criteria()?,
        props: into_record(props)?,
        single,
    })
}

fn into_record(props: Value) -> Result<Record, QueryError> {
    match props {
        Value::Object(map) => Ok(map),
        other => Err(QueryError::InvalidArgument(format!(
            "properties must be a mapping, got {other}"
        ))),
    }
}
