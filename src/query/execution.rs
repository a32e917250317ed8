//! Statement execution and result shaping.
//!
//! Execution order for one statement:
//!
//! 1. Resolve pending timestamps to a single instant
//! 2. Use the bound connection, or lease one for the duration of the call
//! 3. Run the statement and shape its result
//! 4. Populate requested relations on the same connection
//!
//! Failures are passed through the statement's interceptors.

use super::builder::{OutputMode, Statement};
use super::{QueryBuilder, QueryError};
use crate::executor::{ConnectionSource, Executor, Lease, QueryResult, StorageError, StorageErrorKind};
use crate::model::cast_row;
use crate::relation::{populate_many, populate_one};
use crate::value::Record;
use serde_json::Value;

/// Shaped outcome of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Single-record operations; `None` when nothing matched.
    Record(Option<Record>),
    Records(Vec<Record>),
    /// Rows affected by a mutation without `fetch`.
    Affected(u64),
    Count(u64),
}

impl QueryOutput {
    pub fn into_record(self) -> Option<Record> {
        match self {
            QueryOutput::Record(record) => record,
            QueryOutput::Records(records) => records.into_iter().next(),
            QueryOutput::Affected(_) | QueryOutput::Count(_) => None,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            QueryOutput::Record(record) => record.into_iter().collect(),
            QueryOutput::Records(records) => records,
            QueryOutput::Affected(_) | QueryOutput::Count(_) => Vec::new(),
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            QueryOutput::Affected(n) => Some(*n),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            QueryOutput::Count(n) => Some(*n),
            _ => None,
        }
    }
}

impl Statement<'_> {
    /// Run the statement, leasing a connection from `source` unless one was
    /// bound with `using_connection`.
    ///
    /// # Errors
    ///
    /// Storage failures, translated by any matching interceptor. A
    /// single-match operation that matched several rows fails with
    /// `AmbiguousMatch`.
    pub fn execute<S: ConnectionSource + ?Sized>(mut self, source: &S) -> Result<QueryOutput, QueryError> {
        let sql = match self.sql.take() {
            Some(sql) => sql,
            None => return Ok(self.empty_output()),
        };

        if self.args.has_pending_timestamp() {
            self.args.resolve_timestamps(self.registry.clock().now());
        }

        let result = match self.connection {
            Some(conn) => self.run(conn, &sql),
            None => {
                let lease = Lease::acquire(source).map_err(QueryError::Storage)?;
                self.run(&*lease, &sql)
            }
        };

        result.map_err(|err| self.fail(err))
    }

    fn run(&self, conn: &dyn Executor, sql: &str) -> Result<QueryOutput, StorageError> {
        let result = conn.execute(sql, self.args.as_slice())?;
        let mut output = self.shape(result);

        let schema = self.schema.as_deref();
        for plan in &self.populate {
            match &mut output {
                QueryOutput::Record(Some(record)) => {
                    populate_one(conn, &self.registry, schema, plan, record)?
                }
                QueryOutput::Records(records) => {
                    populate_many(conn, &self.registry, schema, plan, records)?
                }
                _ => {}
            }
        }
        Ok(output)
    }

    fn shape(&self, result: QueryResult) -> QueryOutput {
        match self.mode {
            OutputMode::Single => {
                QueryOutput::Record(result.rows.into_iter().next().map(|row| cast_row(&self.model, row)))
            }
            OutputMode::Many => QueryOutput::Records(
                result
                    .rows
                    .into_iter()
                    .map(|row| cast_row(&self.model, row))
                    .collect(),
            ),
            OutputMode::Affected => QueryOutput::Affected(result.row_count),
            OutputMode::Count => QueryOutput::Count(
                result
                    .rows
                    .first()
                    .and_then(|row| row.get("count"))
                    .and_then(count_value)
                    .unwrap_or(0),
            ),
        }
    }

    /// Output of an operation that issues no statement.
    fn empty_output(&self) -> QueryOutput {
        match self.mode {
            OutputMode::Single => QueryOutput::Record(None),
            OutputMode::Many => QueryOutput::Records(Vec::new()),
            OutputMode::Affected => QueryOutput::Affected(0),
            OutputMode::Count => QueryOutput::Count(0),
        }
    }

    fn fail(self, err: StorageError) -> QueryError {
        if self.interceptors.covers(&err) {
            return self.interceptors.resolve(err);
        }
        if self.single_match && err.kind() == StorageErrorKind::CardinalityViolation {
            return QueryError::AmbiguousMatch(self.model.display_name().to_string());
        }
        QueryError::Storage(err)
    }
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl QueryBuilder<'_> {
    /// Build and execute in one step.
    ///
    /// # Errors
    ///
    /// Any error from [`build`](Self::build) or
    /// [`Statement::execute`].
    pub fn exec<S: ConnectionSource + ?Sized>(self, source: &S) -> Result<QueryOutput, QueryError> {
        self.build()?.execute(source)
    }
}
