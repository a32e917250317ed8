//! Storage collaborator contract.
//!
//! The query layer only needs three things from storage: a way to run one
//! statement with positional arguments ([`Executor`]), a way to lease and
//! return connections ([`ConnectionSource`]), and identifier quoting
//! ([`QuoteIdentifier`]). [`MayPostgresExecutor`] implements the first on top
//! of a `may_postgres::Client`; [`crate::pool::Pool`] implements the second.

use crate::value::pg::decode_row;
use crate::value::{Record, SqlValue};
use may_postgres::types::ToSql;
use may_postgres::Client;
use std::fmt;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Outcome of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Record>,
    pub row_count: u64,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Record>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }

    pub fn affected(row_count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count,
        }
    }
}

/// Engine-independent classification of a native storage error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    /// A scalar subquery produced more than one row.
    CardinalityViolation,
    SerializationFailure,
    DeadlockDetected,
    Other,
}

impl StorageErrorKind {
    /// Classify a PostgreSQL SQLSTATE.
    pub fn from_code(code: &str) -> Self {
        match code {
            "23505" => StorageErrorKind::UniqueViolation,
            "23503" => StorageErrorKind::ForeignKeyViolation,
            "23502" => StorageErrorKind::NotNullViolation,
            "23514" => StorageErrorKind::CheckViolation,
            "21000" => StorageErrorKind::CardinalityViolation,
            "40001" => StorageErrorKind::SerializationFailure,
            "40P01" => StorageErrorKind::DeadlockDetected,
            _ => StorageErrorKind::Other,
        }
    }

    /// Native codes that classify as this kind.
    pub fn native_codes(&self) -> &'static [&'static str] {
        match self {
            StorageErrorKind::UniqueViolation => &["23505"],
            StorageErrorKind::ForeignKeyViolation => &["23503"],
            StorageErrorKind::NotNullViolation => &["23502"],
            StorageErrorKind::CheckViolation => &["23514"],
            StorageErrorKind::CardinalityViolation => &["21000"],
            StorageErrorKind::SerializationFailure => &["40001"],
            StorageErrorKind::DeadlockDetected => &["40P01"],
            StorageErrorKind::Other => &[],
        }
    }
}

/// Error reported by the storage collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageError {
    code: Option<String>,
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Native error code (SQLSTATE for PostgreSQL), if the engine supplied one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.code
            .as_deref()
            .map(StorageErrorKind::from_code)
            .unwrap_or(StorageErrorKind::Other)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "Storage error [{code}]: {}", self.message),
            None => write!(f, "Storage error: {}", self.message),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<may_postgres::Error> for StorageError {
    fn from(err: may_postgres::Error) -> Self {
        Self {
            code: err.code().map(|state| state.code().to_string()),
            message: err.to_string(),
        }
    }
}

/// Runs one statement on one connection.
///
/// Statements issued on the same executor run strictly in submission order.
pub trait Executor {
    /// Execute `sql` with positional arguments bound to `$1`, `$2`, ...
    ///
    /// # Errors
    ///
    /// Returns `StorageError` carrying the engine's native code when the
    /// statement fails.
    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<QueryResult, StorageError>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<QueryResult, StorageError> {
        (**self).execute(sql, args)
    }
}

/// Leases connections; owned and torn down by the caller.
pub trait ConnectionSource {
    type Connection: Executor;

    fn acquire(&self) -> Result<Self::Connection, StorageError>;

    fn release(&self, conn: Self::Connection);
}

/// A leased connection, released back to its source exactly once on drop.
pub struct Lease<'s, S: ConnectionSource + ?Sized> {
    source: &'s S,
    conn: Option<S::Connection>,
}

impl<'s, S: ConnectionSource + ?Sized> Lease<'s, S> {
    pub fn acquire(source: &'s S) -> Result<Self, StorageError> {
        let conn = source.acquire()?;
        Ok(Self {
            source,
            conn: Some(conn),
        })
    }
}

impl<S: ConnectionSource + ?Sized> std::ops::Deref for Lease<'_, S> {
    type Target = S::Connection;

    fn deref(&self) -> &S::Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl<S: ConnectionSource + ?Sized> Drop for Lease<'_, S> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.source.release(conn);
        }
    }
}

/// Escapes identifiers for interpolation into SQL text.
pub trait QuoteIdentifier: Send + Sync {
    fn quote_identifier(&self, ident: &str) -> String;
}

/// PostgreSQL identifier quoting: wrap in double quotes, double embedded quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl QuoteIdentifier for PostgresDialect {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Whether a statement produces a row set rather than only a row count.
fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH") || upper.contains(" RETURNING ")
}

/// [`Executor`] over a `may_postgres::Client`.
///
/// Blocking calls on the client suspend the calling coroutine rather than the
/// worker thread.
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    /// Run `SELECT 1` to check the connection is still usable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the health check query fails.
    pub fn check_health(&self) -> Result<bool, StorageError> {
        crate::connection::check_connection_health(&self.client)
            .map_err(|e| StorageError::new(format!("Health check error: {e}")))
    }

    fn run(&self, sql: &str, args: &[SqlValue]) -> Result<QueryResult, may_postgres::Error> {
        let params: Vec<&dyn ToSql> = args.iter().map(|a| a as &dyn ToSql).collect();
        if returns_rows(sql) {
            let rows = self.client.query(sql, &params)?;
            let records = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
            Ok(QueryResult::from_rows(records))
        } else {
            let count = self.client.execute(sql, &params)?;
            Ok(QueryResult::affected(count))
        }
    }
}

impl Executor for MayPostgresExecutor {
    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<QueryResult, StorageError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();

        let start = Instant::now();
        let result = self.run(sql, args).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_query_error();
            StorageError::from(e)
        });

        let duration = start.elapsed();
        log::debug!("executed statement in {:?}: {}", duration, sql);
        #[cfg(feature = "metrics")]
        METRICS.record_query_duration(duration);

        result
    }
}
