//! # Breakwater
//!
//! Coroutine-friendly query layer over PostgreSQL for the `may` runtime.
//!
//! Models are described by [`model::ModelDefinition`]s (in Rust or as JSON
//! documents) and registered once in a [`model::ModelRegistry`]. Operations
//! compile JSON criteria and property maps into parameterized SQL, run on a
//! [`pool::Pool`] or on a caller-bound connection, and come back as
//! [`value::Record`]s cast to the model's null policy.
//!
//! - [`query`]: criteria, builders, execution and error interception
//! - [`transaction`]: BEGIN/COMMIT/ROLLBACK around a unit of work
//! - [`relation`]: single-level population of `belongs_to` attributes
//! - [`executor`] and [`pool`]: the storage collaborator and its pool

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod query;
pub mod relation;
pub mod transaction;
pub mod value;

pub use config::DatabaseConfig;
pub use connection::{connect, ConnectionError, PgConnector};
pub use executor::{
    ConnectionSource, Executor, MayPostgresExecutor, QueryResult, StorageError, StorageErrorKind,
};
pub use model::{AttributeSpec, AttributeType, ModelDefinition, ModelRegistry, RegistryError};
pub use pool::Pool;
pub use query::{Criteria, ModelHandle, QueryBuilder, QueryError, QueryOutput, Statement};
pub use transaction::{transaction, IsolationLevel, TransactionError, TransactionRunner};
pub use value::{Record, SqlValue};
