//! Deferred query construction.
//!
//! A [`QueryBuilder`] accumulates modifiers without touching storage.
//! [`QueryBuilder::build`] validates everything and compiles one
//! [`Statement`]; the statement runs at most once because
//! [`Statement::execute`](super::Statement::execute) consumes it.

use super::criteria::{compile_single_match, compile_where, Criteria};
use super::error_handling::{InterceptHandler, Interceptors};
use super::mutation::{apply_defaults, build_insert, build_update_set};
use super::QueryError;
use crate::executor::{Executor, StorageErrorKind};
use crate::model::{ModelDefinition, ModelRegistry};
use crate::value::{Arguments, Record, SqlValue, MAX_SAFE_INTEGER};
use std::fmt;
use std::sync::Arc;

/// The primary statement a builder will issue.
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    Find(Criteria),
    FindOne(Criteria),
    Count(Criteria),
    Create { rows: Vec<Record>, many: bool },
    Update { criteria: Criteria, props: Record, single: bool },
    Destroy { criteria: Criteria, single: bool },
}

impl Operation {
    fn is_read(&self) -> bool {
        matches!(self, Operation::Find(_) | Operation::FindOne(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Operation::Find(_) => "find",
            Operation::FindOne(_) => "find_one",
            Operation::Count(_) => "count",
            Operation::Create { many: false, .. } => "create",
            Operation::Create { many: true, .. } => "create_each",
            Operation::Update { single: false, .. } => "update",
            Operation::Update { single: true, .. } => "update_one",
            Operation::Destroy { single: false, .. } => "destroy",
            Operation::Destroy { single: true, .. } => "destroy_one",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Parse `"column"` or `"column ASC|DESC"`.
pub fn parse_sort(spec: &str) -> Result<(String, SortDirection), QueryError> {
    let tokens: Vec<&str> = spec.split_whitespace().collect();
    match tokens.as_slice() {
        [column] => Ok((column.to_string(), SortDirection::Asc)),
        [column, direction] => {
            let direction = match direction.to_ascii_uppercase().as_str() {
                "ASC" => SortDirection::Asc,
                "DESC" => SortDirection::Desc,
                _ => {
                    return Err(QueryError::InvalidArgument(format!(
                        "unknown sort direction `{direction}` in `{spec}`"
                    )))
                }
            };
            Ok((column.to_string(), direction))
        }
        _ => Err(QueryError::InvalidArgument(format!(
            "sort must be `column` or `column ASC|DESC`, got `{spec}`"
        ))),
    }
}

/// How raw execution results are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One record or none.
    Single,
    /// An ordered sequence of records.
    Many,
    /// Row count reported by storage.
    Affected,
    /// The value of a `COUNT(*)` column.
    Count,
}

/// A relation to load after the primary statement.
#[derive(Debug, Clone)]
pub struct PopulatePlan {
    pub attribute: String,
    pub target: Arc<ModelDefinition>,
}

/// Compiled, validated statement ready to run once.
pub struct Statement<'c> {
    pub(crate) registry: Arc<ModelRegistry>,
    pub(crate) model: Arc<ModelDefinition>,
    pub(crate) schema: Option<String>,
    /// `None` when the operation needs no statement at all.
    pub(crate) sql: Option<String>,
    pub(crate) args: Arguments,
    pub(crate) mode: OutputMode,
    pub(crate) single_match: bool,
    pub(crate) populate: Vec<PopulatePlan>,
    pub(crate) connection: Option<&'c dyn Executor>,
    pub(crate) interceptors: Interceptors,
}

impl Statement<'_> {
    /// SQL text, or `None` for a statement-free no-op.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn arguments(&self) -> &Arguments {
        &self.args
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("model", &self.model.display_name())
            .field("sql", &self.sql)
            .field("args", &self.args)
            .field("mode", &self.mode)
            .field("bound", &self.connection.is_some())
            .finish()
    }
}

/// A pending operation on one model.
///
/// Modifiers may be chained in any order. The first invalid modifier is
/// remembered and reported by [`build`](Self::build).
pub struct QueryBuilder<'c> {
    registry: Arc<ModelRegistry>,
    model: Arc<ModelDefinition>,
    schema: Option<String>,
    operation: Operation,
    fetch: bool,
    limit: Option<i64>,
    sort: Vec<(String, SortDirection)>,
    populate: Vec<String>,
    connection: Option<&'c dyn Executor>,
    interceptors: Interceptors,
    error: Option<QueryError>,
}

impl<'c> QueryBuilder<'c> {
    pub(crate) fn new(
        registry: Arc<ModelRegistry>,
        model: Arc<ModelDefinition>,
        schema: Option<String>,
        operation: Result<Operation, QueryError>,
    ) -> Self {
        let (operation, error) = match operation {
            Ok(op) => (op, None),
            Err(e) => (Operation::Find(Criteria::All), Some(e)),
        };
        Self {
            registry,
            model,
            schema,
            operation,
            fetch: false,
            limit: None,
            sort: Vec::new(),
            populate: Vec::new(),
            connection: None,
            interceptors: Interceptors::default(),
            error,
        }
    }

    fn fail(mut self, err: QueryError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    /// Return affected rows (`RETURNING *`) instead of a row count.
    pub fn fetch(mut self) -> Self {
        self.fetch = true;
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        if !(0..=MAX_SAFE_INTEGER).contains(&n) {
            return self.fail(QueryError::InvalidArgument(format!(
                "limit must be a non-negative safe integer, got {n}"
            )));
        }
        self.limit = Some(n);
        self
    }

    /// Order by `"column"` or `"column ASC|DESC"`; repeated calls add keys.
    pub fn sort(mut self, spec: &str) -> Self {
        match parse_sort(spec) {
            Ok(key) => {
                self.sort.push(key);
                self
            }
            Err(e) => self.fail(e),
        }
    }

    /// Eager-load the relation stored in `attribute`.
    pub fn populate(mut self, attribute: impl Into<String>) -> Self {
        self.populate.push(attribute.into());
        self
    }

    /// Run on a caller-owned connection, which is never released here.
    pub fn using_connection(mut self, conn: &'c dyn Executor) -> Self {
        self.connection = Some(conn);
        self
    }

    /// Translate storage errors of symbolic `kind` with `handler`.
    pub fn intercept(mut self, kind: &str, handler: impl Into<InterceptHandler>) -> Self {
        self.interceptors.register(kind, handler.into());
        self
    }

    pub fn intercept_kind(mut self, kind: StorageErrorKind, handler: impl Into<InterceptHandler>) -> Self {
        self.interceptors.register_kind(kind, handler.into());
        self
    }

    /// Register a handler given as a dynamic value.
    ///
    /// # Errors
    ///
    /// `build` reports `NotImplemented` if the value is not a supported
    /// handler shape.
    pub fn intercept_value(self, kind: &str, handler: serde_json::Value) -> Self {
        match InterceptHandler::from_value(handler) {
            Ok(handler) => self.intercept(kind, handler),
            Err(e) => self.fail(e),
        }
    }

    /// Validate modifiers and compile the statement.
    ///
    /// # Errors
    ///
    /// Returns the first compilation error; nothing has reached storage.
    pub fn build(self) -> Result<Statement<'c>, QueryError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let read = self.operation.is_read();
        if !read && (self.limit.is_some() || !self.sort.is_empty()) {
            return Err(QueryError::InvalidArgument(format!(
                "limit and sort only apply to reads, not {}",
                self.operation.name()
            )));
        }

        let populate = self
            .populate
            .iter()
            .map(|attribute| resolve_populate(&self.registry, &self.model, attribute))
            .collect::<Result<Vec<_>, _>>()?;

        let registry = &self.registry;
        let model = &self.model;
        let table = registry.table_ref(model, self.schema.as_deref());
        let returning = if self.fetch { " RETURNING *" } else { "" };
        let mut args = Arguments::new();
        let mut single_match = false;

        let (sql, mode) = match self.operation {
            Operation::Find(criteria) => {
                let filter = compile_where(registry, model, &criteria, &mut args);
                (Some(select(&table, &filter)), OutputMode::Many)
            }
            Operation::FindOne(criteria) => {
                single_match = true;
                let filter = compile_single_match(registry, model, &table, &criteria, &mut args);
                (Some(select(&table, &filter)), OutputMode::Single)
            }
            Operation::Count(criteria) => {
                let filter = compile_where(registry, model, &criteria, &mut args);
                let head = format!("SELECT COUNT(*) AS {} FROM {table}", registry.quote("count"));
                let sql = join(&[head.as_str(), filter.as_str()]);
                (Some(sql), OutputMode::Count)
            }
            Operation::Create { rows, many } => {
                let mode = match (self.fetch, many) {
                    (false, _) => OutputMode::Affected,
                    (true, false) => OutputMode::Single,
                    (true, true) => OutputMode::Many,
                };
                if rows.is_empty() {
                    (None, mode)
                } else {
                    let rows = rows.iter().map(|props| apply_defaults(model, props, true)).collect();
                    let values = build_insert(registry, rows, &mut args)?;
                    (Some(format!("INSERT INTO {table} {values}{returning}")), mode)
                }
            }
            Operation::Update { criteria, props, single } => {
                single_match = single;
                let assignments = apply_defaults(model, &props, false);
                let set = build_update_set(registry, assignments, &mut args);
                let filter = if single {
                    compile_single_match(registry, model, &table, &criteria, &mut args)
                } else {
                    compile_where(registry, model, &criteria, &mut args)
                };
                let mode = fetched_mode(self.fetch, single);
                if set.is_empty() {
                    // Nothing to assign: read the matched rows if they were asked for.
                    let sql = self.fetch.then(|| select(&table, &filter));
                    (sql, mode)
                } else {
                    let sql = join(&[format!("UPDATE {table} {set}").as_str(), filter.as_str()]);
                    (Some(format!("{sql}{returning}")), mode)
                }
            }
            Operation::Destroy { criteria, single } => {
                single_match = single;
                let filter = if single {
                    compile_single_match(registry, model, &table, &criteria, &mut args)
                } else {
                    compile_where(registry, model, &criteria, &mut args)
                };
                let sql = join(&[format!("DELETE FROM {table}").as_str(), filter.as_str()]);
                (Some(format!("{sql}{returning}")), fetched_mode(self.fetch, single))
            }
        };

        let sql = sql.map(|sql| {
            let mut parts = vec![sql];
            if !self.sort.is_empty() {
                let keys: Vec<String> = self
                    .sort
                    .iter()
                    .map(|(column, direction)| format!("{} {}", registry.quote(column), direction.as_sql()))
                    .collect();
                parts.push(format!("ORDER BY {}", keys.join(", ")));
            }
            if let Some(n) = self.limit {
                parts.push(format!("LIMIT {}", args.push(SqlValue::Int(n))));
            }
            parts.join(" ")
        });

        Ok(Statement {
            registry: self.registry,
            model: self.model,
            schema: self.schema,
            sql,
            args,
            mode,
            single_match,
            populate,
            connection: self.connection,
            interceptors: self.interceptors,
        })
    }
}

impl fmt::Debug for QueryBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("model", &self.model.display_name())
            .field("operation", &self.operation.name())
            .field("fetch", &self.fetch)
            .field("limit", &self.limit)
            .field("sort", &self.sort)
            .field("populate", &self.populate)
            .field("bound", &self.connection.is_some())
            .finish()
    }
}

fn fetched_mode(fetch: bool, single: bool) -> OutputMode {
    match (fetch, single) {
        (false, _) => OutputMode::Affected,
        (true, true) => OutputMode::Single,
        (true, false) => OutputMode::Many,
    }
}

fn select(table: &str, filter: &str) -> String {
    join(&[format!("SELECT * FROM {table}").as_str(), filter])
}

fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_populate(
    registry: &ModelRegistry,
    model: &ModelDefinition,
    attribute: &str,
) -> Result<PopulatePlan, QueryError> {
    let spec = model.attribute(attribute).ok_or_else(|| {
        QueryError::InvalidArgument(format!(
            "{} has no attribute `{attribute}` to populate",
            model.display_name()
        ))
    })?;
    let target = spec.relation_target.as_deref().ok_or_else(|| {
        QueryError::InvalidArgument(format!(
            "`{attribute}` on {} is not a relation",
            model.display_name()
        ))
    })?;
    let target = registry
        .definition(target)
        .ok_or_else(|| QueryError::ModelNotFound(target.to_string()))?;
    Ok(PopulatePlan {
        attribute: attribute.to_string(),
        target: target.clone(),
    })
}
