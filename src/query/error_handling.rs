//! Storage error interception.
//!
//! Callers register handlers against symbolic error kinds (`E_UNIQUE`,
//! `E_FOREIGN_KEY`, ...). Each kind resolves to the native codes it covers;
//! when a statement fails with one of those codes the handler replaces the
//! storage error.

use super::QueryError;
use crate::executor::{StorageError, StorageErrorKind};
use serde_json::Value;
use std::fmt;

/// Native codes covered by a symbolic error kind.
///
/// Unknown kinds cover nothing, so registering them installs no interception.
pub fn codes_for(kind: &str) -> &'static [&'static str] {
    let kind = match kind {
        "E_UNIQUE" | "unique" => StorageErrorKind::UniqueViolation,
        "E_FOREIGN_KEY" | "foreign_key" => StorageErrorKind::ForeignKeyViolation,
        "E_NOT_NULL" | "not_null" => StorageErrorKind::NotNullViolation,
        "E_CHECK" | "check" => StorageErrorKind::CheckViolation,
        "E_CARDINALITY" | "cardinality" => StorageErrorKind::CardinalityViolation,
        "E_SERIALIZATION" | "serialization" => StorageErrorKind::SerializationFailure,
        "E_DEADLOCK" | "deadlock" => StorageErrorKind::DeadlockDetected,
        _ => return &[],
    };
    kind.native_codes()
}

/// Replacement for an intercepted storage error.
pub enum InterceptHandler {
    /// Returned verbatim.
    Value(QueryError),
    /// Called with the storage error.
    Map(Box<dyn FnOnce(StorageError) -> QueryError + Send>),
}

impl InterceptHandler {
    pub fn map<F>(f: F) -> Self
    where
        F: FnOnce(StorageError) -> QueryError + Send + 'static,
    {
        InterceptHandler::Map(Box::new(f))
    }

    /// Handler from a dynamic value: objects and strings become literal
    /// rejections.
    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        match value {
            Value::Object(_) | Value::String(_) => {
                Ok(InterceptHandler::Value(QueryError::Rejected(value)))
            }
            other => Err(QueryError::NotImplemented(format!(
                "interceptor handler must be an error value or a function, got {other}"
            ))),
        }
    }

    fn apply(self, err: StorageError) -> QueryError {
        match self {
            InterceptHandler::Value(value) => value,
            InterceptHandler::Map(f) => f(err),
        }
    }
}

impl fmt::Debug for InterceptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptHandler::Value(v) => f.debug_tuple("Value").field(v).finish(),
            InterceptHandler::Map(_) => f.write_str("Map(..)"),
        }
    }
}

impl From<QueryError> for InterceptHandler {
    fn from(value: QueryError) -> Self {
        InterceptHandler::Value(value)
    }
}

fn handles(codes: &[&str], code: &str) -> bool {
    codes.iter().any(|c| *c == code)
}

/// Registered handlers, consulted in registration order.
#[derive(Debug, Default)]
pub struct Interceptors {
    handlers: Vec<(&'static [&'static str], InterceptHandler)>,
}

impl Interceptors {
    /// Register `handler` for the native codes of `kind`.
    pub fn register(&mut self, kind: &str, handler: InterceptHandler) {
        let codes = codes_for(kind);
        if codes.is_empty() {
            log::debug!("ignoring interceptor for unknown error kind {kind}");
            return;
        }
        self.handlers.push((codes, handler));
    }

    pub fn register_kind(&mut self, kind: StorageErrorKind, handler: InterceptHandler) {
        let codes = kind.native_codes();
        if !codes.is_empty() {
            self.handlers.push((codes, handler));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Whether some handler covers `err`.
    pub fn covers(&self, err: &StorageError) -> bool {
        err.code()
            .is_some_and(|code| self.handlers.iter().any(|(codes, _)| handles(codes, code)))
    }

    /// Translate `err` through the first matching handler, or pass it through.
    pub fn resolve(mut self, err: StorageError) -> QueryError {
        let position = err.code().and_then(|code| {
            self.handlers
                .iter()
                .position(|(codes, _)| handles(codes, code))
        });
        match position {
            Some(index) => {
                let (_, handler) = self.handlers.swap_remove(index);
                handler.apply(err)
            }
            None => QueryError::Storage(err),
        }
    }
}
