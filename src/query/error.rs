//! Error taxonomy for compiling and executing queries.

use crate::executor::StorageError;
use serde_json::Value;
use std::fmt;

/// Query error type
///
/// Compilation errors (`InvalidArgument`, `UnsupportedOperator`,
/// `InvalidCriteria`, `ModelNotFound`, `NotImplemented`) are reported by
/// `QueryBuilder::build` before any statement reaches storage. Everything
/// else originates from storage and passes through the interceptors.
#[derive(Debug)]
pub enum QueryError {
    /// Malformed limit, sort, criteria shape or row set
    InvalidArgument(String),
    /// Criteria operator outside `<`, `>`, `<=`, `>=`, `!=`
    UnsupportedOperator(String),
    /// Malformed operator mapping
    InvalidCriteria(String),
    /// A single-match operation matched more than one row
    AmbiguousMatch(String),
    /// A model (or relation target) is not registered
    ModelNotFound(String),
    /// Handler or feature shape the query layer does not support
    NotImplemented(String),
    /// Error reported by storage, unchanged
    Storage(StorageError),
    /// Literal rejection value supplied by an interceptor
    Rejected(Value),
    /// Error produced by a caller-supplied interceptor function
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl QueryError {
    pub fn custom(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        QueryError::Custom(Box::new(err))
    }

    /// The storage error, if this failure came from storage unchanged.
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            QueryError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidArgument(s) => write!(f, "Invalid argument: {s}"),
            QueryError::UnsupportedOperator(op) => write!(f, "Unsupported operator: {op}"),
            QueryError::InvalidCriteria(s) => write!(f, "Invalid criteria: {s}"),
            QueryError::AmbiguousMatch(model) => {
                write!(f, "More than one {model} record matched a single-record operation")
            }
            QueryError::ModelNotFound(name) => write!(f, "Model not found: {name}"),
            QueryError::NotImplemented(s) => write!(f, "Not implemented: {s}"),
            QueryError::Storage(e) => write!(f, "{e}"),
            QueryError::Rejected(value) => write!(f, "Rejected: {value}"),
            QueryError::Custom(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Storage(e) => Some(e),
            QueryError::Custom(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        QueryError::Storage(err)
    }
}
