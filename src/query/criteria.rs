//! Criteria and their compilation into WHERE fragments.
//!
//! Criteria arrive either as JSON (`{"age": {">": 21}, "name": ["a", "b"]}`)
//! or through the typed constructors on [`Criteria`]. JSON is validated once
//! by [`Criteria::parse`]; after that compilation is total.
//!
//! | criteria                     | SQL                          |
//! |------------------------------|------------------------------|
//! | absent / `{}`                | no WHERE (whole table)       |
//! | scalar `7`                   | `"id" = $n`                  |
//! | `{"a": null}`                | `"a" IS NULL`                |
//! | `{"a": [1, 2]}`              | `"a" = ANY($n)`              |
//! | `{"a": {"!=": null}}`        | `"a" IS NOT NULL`            |
//! | `{"a": {"!=": [1, 2]}}`      | `NOT ("a" = ANY($n))`        |
//! | `{"a": {"<=": 3}}`           | `"a" <= $n`                  |
//! | `{"a": 3}`                   | `"a" = $n`                   |

use super::{bind_value, QueryError};
use crate::model::{ModelDefinition, ModelRegistry};
use crate::value::{Arguments, SqlValue};
use serde_json::Value;

/// Ordering comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }
}

/// Test applied to one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    IsNull,
    IsNotNull,
    Compare(CompareOp, Value),
}

/// Column a clause tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// The model's primary key, whatever it is named.
    PrimaryKey,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: Column,
    pub predicate: Predicate,
}

/// A validated filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Criteria {
    /// Every row of the table.
    #[default]
    All,
    /// Primary-key equality shorthand.
    PrimaryKey(Value),
    /// Clauses joined with `AND`.
    Where(Vec<Clause>),
}

impl Criteria {
    pub fn all() -> Self {
        Criteria::All
    }

    pub fn id(value: impl Into<Value>) -> Self {
        Criteria::PrimaryKey(value.into())
    }

    /// Add a clause, turning `All` into a clause list.
    ///
    /// A primary-key shorthand becomes a [`Column::PrimaryKey`] clause so
    /// that further clauses still narrow it.
    fn with(self, attribute: impl Into<String>, predicate: Predicate) -> Self {
        let clause = Clause {
            column: Column::Attribute(attribute.into()),
            predicate,
        };
        match self {
            Criteria::All => Criteria::Where(vec![clause]),
            Criteria::Where(mut clauses) => {
                clauses.push(clause);
                Criteria::Where(clauses)
            }
            Criteria::PrimaryKey(pk) => Criteria::Where(vec![
                Clause {
                    column: Column::PrimaryKey,
                    predicate: Predicate::Equals(pk),
                },
                clause,
            ]),
        }
    }

    pub fn eq(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => self.with(attribute, Predicate::IsNull),
            value => self.with(attribute, Predicate::Equals(value)),
        }
    }

    pub fn ne(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => self.with(attribute, Predicate::IsNotNull),
            value => self.with(attribute, Predicate::NotEquals(value)),
        }
    }

    pub fn is_in(self, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(attribute, Predicate::In(values))
    }

    pub fn not_in(self, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(attribute, Predicate::NotIn(values))
    }

    pub fn is_null(self, attribute: impl Into<String>) -> Self {
        self.with(attribute, Predicate::IsNull)
    }

    pub fn is_not_null(self, attribute: impl Into<String>) -> Self {
        self.with(attribute, Predicate::IsNotNull)
    }

    pub fn compare(self, attribute: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.with(attribute, Predicate::Compare(op, value.into()))
    }

    pub fn lt(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(attribute, CompareOp::Lt, value)
    }

    pub fn gt(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(attribute, CompareOp::Gt, value)
    }

    pub fn le(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(attribute, CompareOp::Le, value)
    }

    pub fn ge(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(attribute, CompareOp::Ge, value)
    }

    /// Whether this criteria covers the whole table.
    pub fn is_all(&self) -> bool {
        match self {
            Criteria::All => true,
            Criteria::Where(clauses) => clauses.is_empty(),
            Criteria::PrimaryKey(_) => false,
        }
    }

    /// Validate a JSON criteria value.
    pub fn parse(value: &Value) -> Result<Self, QueryError> {
        match value {
            Value::Null => Ok(Criteria::All),
            Value::Object(map) if map.is_empty() => Ok(Criteria::All),
            Value::Object(map) => map
                .iter()
                .map(|(attribute, v)| {
                    if attribute.is_empty() {
                        return Err(QueryError::InvalidCriteria(
                            "attribute names in criteria cannot be empty".to_string(),
                        ));
                    }
                    Ok(Clause {
                        column: Column::Attribute(attribute.clone()),
                        predicate: parse_predicate(attribute, v)?,
                    })
                })
                .collect::<Result<Vec<_>, QueryError>>()
                .map(Criteria::Where),
            Value::Array(_) => Err(QueryError::InvalidArgument(
                "criteria must be a mapping or a primary key value, not a sequence".to_string(),
            )),
            scalar => Ok(Criteria::PrimaryKey(scalar.clone())),
        }
    }
}

fn parse_predicate(attribute: &str, value: &Value) -> Result<Predicate, QueryError> {
    match value {
        Value::Null => Ok(Predicate::IsNull),
        Value::Array(items) => Ok(Predicate::In(items.clone())),
        Value::Object(ops) => {
            let mut entries = ops.iter();
            let (op, operand) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => {
                    return Err(QueryError::InvalidCriteria(format!(
                        "operator mapping for `{attribute}` must have exactly one key, found {}",
                        ops.len()
                    )))
                }
            };
            let compare = match op.as_str() {
                "!=" => None,
                "<" => Some(CompareOp::Lt),
                ">" => Some(CompareOp::Gt),
                "<=" => Some(CompareOp::Le),
                ">=" => Some(CompareOp::Ge),
                other => return Err(QueryError::UnsupportedOperator(other.to_string())),
            };
            match (compare, operand) {
                (None, Value::Null) => Ok(Predicate::IsNotNull),
                (None, Value::Array(items)) => Ok(Predicate::NotIn(items.clone())),
                (_, Value::Object(_)) | (Some(_), Value::Null) | (Some(_), Value::Array(_)) => {
                    Err(QueryError::InvalidCriteria(format!(
                        "`{op}` on `{attribute}` needs a scalar operand, got {operand}"
                    )))
                }
                (None, scalar) => Ok(Predicate::NotEquals(scalar.clone())),
                (Some(cmp), scalar) => Ok(Predicate::Compare(cmp, scalar.clone())),
            }
        }
        scalar => Ok(Predicate::Equals(scalar.clone())),
    }
}

/// Conversion into [`Criteria`], validating JSON input.
pub trait IntoCriteria {
    fn into_criteria(self) -> Result<Criteria, QueryError>;
}

impl IntoCriteria for Criteria {
    fn into_criteria(self) -> Result<Criteria, QueryError> {
        Ok(self)
    }
}

impl IntoCriteria for Value {
    fn into_criteria(self) -> Result<Criteria, QueryError> {
        Criteria::parse(&self)
    }
}

impl IntoCriteria for () {
    fn into_criteria(self) -> Result<Criteria, QueryError> {
        Ok(Criteria::All)
    }
}

macro_rules! primary_key_criteria {
    ($($t:ty),*) => {
        $(impl IntoCriteria for $t {
            fn into_criteria(self) -> Result<Criteria, QueryError> {
                Ok(Criteria::PrimaryKey(Value::from(self)))
            }
        })*
    };
}

primary_key_criteria!(i32, i64, u32, u64, &str, String);

fn compile_clause(
    registry: &ModelRegistry,
    model: &ModelDefinition,
    clause: &Clause,
    args: &mut Arguments,
) -> String {
    let name = match &clause.column {
        Column::PrimaryKey => model.primary_key_name(),
        Column::Attribute(name) => name.as_str(),
    };
    let column = registry.quote(name);
    let spec = model.attribute(name);
    let array = |items: &[Value]| SqlValue::Array(items.iter().map(|v| bind_value(spec, v)).collect());

    match &clause.predicate {
        Predicate::IsNull | Predicate::Equals(Value::Null) => format!("{column} IS NULL"),
        Predicate::IsNotNull | Predicate::NotEquals(Value::Null) => format!("{column} IS NOT NULL"),
        Predicate::In(items) => format!("{column} = ANY({})", args.push(array(items))),
        Predicate::NotIn(items) => format!("NOT ({column} = ANY({}))", args.push(array(items))),
        Predicate::Equals(v) => format!("{column} = {}", args.push(bind_value(spec, v))),
        Predicate::NotEquals(v) => format!("{column} != {}", args.push(bind_value(spec, v))),
        Predicate::Compare(op, v) => {
            format!("{column} {} {}", op.as_sql(), args.push(bind_value(spec, v)))
        }
    }
}

/// Compile `criteria` into a `WHERE ...` fragment, or an empty string for
/// whole-table scope.
pub fn compile_where(
    registry: &ModelRegistry,
    model: &ModelDefinition,
    criteria: &Criteria,
    args: &mut Arguments,
) -> String {
    match criteria {
        Criteria::All => String::new(),
        Criteria::PrimaryKey(pk) => {
            let spec = model.attribute(model.primary_key_name());
            format!(
                "WHERE {} = {}",
                registry.quote(model.primary_key_name()),
                args.push(bind_value(spec, pk))
            )
        }
        Criteria::Where(clauses) if clauses.is_empty() => String::new(),
        Criteria::Where(clauses) => {
            let conditions: Vec<String> = clauses
                .iter()
                .map(|clause| compile_clause(registry, model, clause, args))
                .collect();
            format!("WHERE {}", conditions.join(" AND "))
        }
    }
}

/// Compile `criteria` as a single-match filter:
/// `WHERE "pk" = (SELECT "pk" FROM table <where>)`.
///
/// The engine rejects a subselect yielding more than one row; zero rows
/// compares against NULL and matches nothing.
pub fn compile_single_match(
    registry: &ModelRegistry,
    model: &ModelDefinition,
    table: &str,
    criteria: &Criteria,
    args: &mut Arguments,
) -> String {
    let pk = registry.quote(model.primary_key_name());
    let inner = compile_where(registry, model, criteria, args);
    let subselect = if inner.is_empty() {
        format!("SELECT {pk} FROM {table}")
    } else {
        format!("SELECT {pk} FROM {table} {inner}")
    };
    format!("WHERE {pk} = ({subselect})")
}
