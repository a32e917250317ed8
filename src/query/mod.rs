//! Query compilation and execution for registered models.
//!
//! Operations start from a [`ModelHandle`] and return a [`QueryBuilder`].
//! Nothing reaches storage until the builder is built and executed:
//!
//! ```no_run
//! use breakwater::model::{AttributeSpec, ModelDefinition, ModelRegistry};
//! use breakwater::pool::{config::DatabaseConfig, Pool};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ModelRegistry::builder()
//!     .model(ModelDefinition::new("User").with_attribute("name", AttributeSpec::string()))
//!     .build()?;
//! let pool = Pool::from_config(&DatabaseConfig::load()?)?;
//!
//! let users = registry.model("user")?;
//! users.create(json!({ "name": "alice" })).exec(&pool)?;
//! let alice = users
//!     .find_one(json!({ "name": "alice" }))
//!     .exec(&pool)?
//!     .into_record();
//! # Ok(())
//! # }
//! ```
//!
//! # Layout
//!
//! - **Criteria**: JSON or typed filters compiled into WHERE fragments
//! - **Mutation**: defaults, auto-timestamps, INSERT and UPDATE fragments
//! - **Builder**: modifiers and compilation into a [`Statement`]
//! - **Execution**: running a statement and shaping its output
//! - **Error Handling**: storage error interception

pub mod error;
#[doc(inline)]
pub use error::QueryError;

pub mod criteria;
#[doc(inline)]
pub use criteria::{Clause, Column, CompareOp, Criteria, IntoCriteria, Predicate};

pub mod mutation;

pub mod error_handling;
#[doc(inline)]
pub use error_handling::{codes_for, InterceptHandler, Interceptors};

pub mod builder;
#[doc(inline)]
pub use builder::{OutputMode, PopulatePlan, QueryBuilder, SortDirection, Statement};

pub mod execution;
#[doc(inline)]
pub use execution::QueryOutput;

mod handle;
pub use handle::ModelHandle;

use crate::model::AttributeSpec;
use crate::value::SqlValue;
use serde_json::Value;

/// Bind `value` for a column described by `spec`.
///
/// JSON attributes are sent as their serialized text.
pub(crate) fn bind_value(spec: Option<&AttributeSpec>, value: &Value) -> SqlValue {
    match (spec, value) {
        (_, Value::Null) => SqlValue::Null,
        (Some(spec), v) if spec.is_json() => SqlValue::Text(v.to_string()),
        (_, v) => SqlValue::from_json(v),
    }
}
