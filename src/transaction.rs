//! Transaction wrapping for units of work.
//!
//! [`TransactionRunner::run`] leases one connection, issues `BEGIN`, hands the
//! connection to the unit of work and finishes with `COMMIT` or `ROLLBACK`.
//! Queries join the transaction by binding the connection with
//! `QueryBuilder::using_connection`:
//!
//! ```no_run
//! use breakwater::model::{AttributeSpec, ModelDefinition, ModelRegistry};
//! use breakwater::pool::{config::DatabaseConfig, Pool};
//! use breakwater::query::QueryError;
//! use breakwater::transaction::{IsolationLevel, TransactionRunner};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let registry = ModelRegistry::builder()
//! #     .model(ModelDefinition::new("User").with_attribute("name", AttributeSpec::string()))
//! #     .build()?;
//! let pool = Pool::from_config(&DatabaseConfig::load()?)?;
//! let users = registry.model("user")?;
//!
//! TransactionRunner::new(&pool)
//!     .isolation(IsolationLevel::Serializable)
//!     .run(|conn| -> Result<(), QueryError> {
//!         users.create(json!({ "name": "a" })).using_connection(conn).exec(&pool)?;
//!         users.create(json!({ "name": "b" })).using_connection(conn).exec(&pool)?;
//!         Ok(())
//!     })?;
//! # Ok(())
//! # }
//! ```
//!
//! A failed `ROLLBACK` is logged and otherwise ignored; the unit's own error
//! is what the caller sees.

use crate::executor::{ConnectionSource, Executor, Lease, StorageError};
use crate::query::QueryError;
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read uncommitted (PostgreSQL treats it as ReadCommitted)
    ReadUncommitted,
    /// Read committed (server default)
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Options applied to `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    pub access_mode: AccessMode,
}

impl TransactionOptions {
    /// The `BEGIN` statement for these options.
    pub fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(level) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level.to_sql());
        }
        if self.access_mode == AccessMode::ReadOnly {
            sql.push_str(" READ ONLY");
        }
        sql
    }
}

/// Transaction error type
///
/// Failures of the transaction bracket itself. Errors raised by the unit of
/// work are returned unchanged.
#[derive(Debug)]
pub enum TransactionError {
    /// No connection could be leased
    Acquire(StorageError),
    /// `BEGIN` failed
    Begin(StorageError),
    /// `COMMIT` failed
    Commit(StorageError),
}

impl TransactionError {
    pub fn storage(&self) -> &StorageError {
        match self {
            TransactionError::Acquire(e) | TransactionError::Begin(e) | TransactionError::Commit(e) => e,
        }
    }

    pub fn into_storage(self) -> StorageError {
        match self {
            TransactionError::Acquire(e) | TransactionError::Begin(e) | TransactionError::Commit(e) => e,
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Acquire(e) => write!(f, "Transaction error: acquire failed: {e}"),
            TransactionError::Begin(e) => write!(f, "Transaction error: BEGIN failed: {e}"),
            TransactionError::Commit(e) => write!(f, "Transaction error: COMMIT failed: {e}"),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.storage())
    }
}

impl From<TransactionError> for StorageError {
    fn from(err: TransactionError) -> Self {
        err.into_storage()
    }
}

impl From<TransactionError> for QueryError {
    fn from(err: TransactionError) -> Self {
        QueryError::Storage(err.into_storage())
    }
}

/// Runs units of work inside a transaction on a leased connection.
pub struct TransactionRunner<'s, S: ConnectionSource + ?Sized> {
    source: &'s S,
    options: TransactionOptions,
}

impl<'s, S: ConnectionSource + ?Sized> TransactionRunner<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Self {
            source,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.options.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.options.access_mode = AccessMode::ReadOnly;
        self
    }

    /// Run `unit` between `BEGIN` and `COMMIT`.
    ///
    /// The connection is released exactly once whatever happens.
    ///
    /// # Errors
    ///
    /// The unit's own error after a rollback attempt, or a
    /// [`TransactionError`] if the bracket statements fail.
    pub fn run<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        F: FnOnce(&S::Connection) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let lease = Lease::acquire(self.source).map_err(TransactionError::Acquire)?;

        {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::begin_transaction_span().entered();
            lease
                .execute(&self.options.begin_sql(), &[])
                .map_err(TransactionError::Begin)?;
        }
        #[cfg(feature = "metrics")]
        METRICS.record_transaction();

        // Declared after `lease`, so it rolls back before the connection is released.
        let mut open = OpenTransaction::new(&*lease);

        match unit(&*lease) {
            Ok(value) => {
                #[cfg(feature = "tracing")]
                let _span = tracing_helpers::commit_transaction_span().entered();
                if let Err(e) = lease.execute("COMMIT", &[]) {
                    open.rollback();
                    return Err(TransactionError::Commit(e).into());
                }
                open.finish();
                Ok(value)
            }
            Err(err) => {
                open.rollback();
                Err(err)
            }
        }
    }
}

/// A transaction that is rolled back on drop unless finished.
///
/// Covers a unit of work that unwinds, so its connection never returns to
/// the pool with `BEGIN` still open.
struct OpenTransaction<'a> {
    conn: &'a dyn Executor,
    finished: bool,
}

impl<'a> OpenTransaction<'a> {
    fn new(conn: &'a dyn Executor) -> Self {
        Self { conn, finished: false }
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn rollback(&mut self) {
        self.finished = true;
        rollback(self.conn);
    }
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("transaction abandoned without commit, rolling back");
            rollback(self.conn);
        }
    }
}

fn rollback(conn: &dyn Executor) {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::rollback_transaction_span().entered();
    #[cfg(feature = "metrics")]
    METRICS.record_rollback();

    if let Err(e) = conn.execute("ROLLBACK", &[]) {
        log::warn!("rollback failed: {e}");
    }
}

/// Shorthand for `TransactionRunner::new(source).run(unit)`.
pub fn transaction<S, T, E, F>(source: &S, unit: F) -> Result<T, E>
where
    S: ConnectionSource + ?Sized,
    F: FnOnce(&S::Connection) -> Result<T, E>,
    E: From<TransactionError>,
{
    TransactionRunner::new(source).run(unit)
}
