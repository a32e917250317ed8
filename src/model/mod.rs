//! Model definitions.
//!
//! A [`ModelDefinition`] describes one table: its identifier, display name,
//! primary key and an ordered set of [`AttributeSpec`]s. Definitions are
//! built once (from Rust or from JSON documents) when the
//! [`registry::ModelRegistry`] is created and are shared immutably after that.
//!
//! # Example
//!
//! ```
//! use breakwater::model::{AttributeSpec, ModelDefinition};
//!
//! let pet = ModelDefinition::new("Pet")
//!     .with_attribute("id", AttributeSpec::number().auto_increment())
//!     .with_attribute("name", AttributeSpec::string())
//!     .with_attribute("owner", AttributeSpec::belongs_to("user"));
//!
//! assert_eq!(pet.identifier(), "pet");
//! assert!(pet.attribute("owner").unwrap().is_relation());
//! ```

pub mod cast;
pub mod registry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use cast::cast_row;
pub use registry::{ModelRegistry, RegistryBuilder, RegistryError};

/// Storage type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
    Ref,
}

impl AttributeType {
    /// Value a non-nullable attribute falls back to; `None` for types that stay null.
    pub fn zero_value(&self) -> Option<Value> {
        match self {
            AttributeType::String => Some(Value::String(String::new())),
            AttributeType::Number => Some(Value::from(0)),
            AttributeType::Boolean => Some(Value::Bool(false)),
            AttributeType::Json | AttributeType::Ref => None,
        }
    }
}

/// Schema of one attribute (column).
///
/// Only one of `auto_increment`, `auto_created_at`, `auto_updated_at` and
/// `relation_target` is meaningful per attribute; combinations are not
/// checked.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSpec {
    #[serde(rename = "type", default)]
    pub kind: AttributeType,
    #[serde(default)]
    pub allow_null: bool,
    #[serde(default)]
    pub defaults_to: Option<Value>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub auto_created_at: bool,
    #[serde(default)]
    pub auto_updated_at: bool,
    /// Identifier of the model this attribute references.
    #[serde(default, rename = "model")]
    pub relation_target: Option<String>,
}

impl AttributeSpec {
    pub fn of(kind: AttributeType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::of(AttributeType::String)
    }

    pub fn number() -> Self {
        Self::of(AttributeType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(AttributeType::Boolean)
    }

    pub fn json() -> Self {
        Self::of(AttributeType::Json)
    }

    /// A foreign key holding the primary key of `target`.
    pub fn belongs_to(target: impl Into<String>) -> Self {
        Self {
            kind: AttributeType::Ref,
            relation_target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.defaults_to = Some(value.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn auto_created_at(mut self) -> Self {
        self.auto_created_at = true;
        self
    }

    pub fn auto_updated_at(mut self) -> Self {
        self.auto_updated_at = true;
        self
    }

    pub fn is_relation(&self) -> bool {
        self.relation_target.is_some()
    }

    pub fn is_json(&self) -> bool {
        self.kind == AttributeType::Json
    }

    /// Zero value used when a non-nullable attribute is missing or null.
    ///
    /// JSON, ref and relation attributes are never zero-filled.
    pub fn zero_value(&self) -> Option<Value> {
        if self.allow_null || self.is_relation() {
            return None;
        }
        self.kind.zero_value()
    }
}

/// Schema document for one model, as supplied by a hosting layer.
///
/// ```json
/// {
///   "displayName": "User",
///   "tableName": "users",
///   "attributes": { "name": { "type": "string", "defaultsTo": "anon" } }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDocument {
    #[serde(alias = "globalId", alias = "identity")]
    pub display_name: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

/// Immutable schema of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    identifier: String,
    display_name: String,
    primary_key: String,
    attributes: Vec<(String, AttributeSpec)>,
}

impl ModelDefinition {
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            identifier: display_name.to_lowercase(),
            display_name,
            primary_key: "id".to_string(),
            attributes: Vec::new(),
        }
    }

    /// Build a definition from a JSON document.
    pub fn from_document(document: ModelDocument) -> Result<Self, serde_json::Error> {
        let mut model = Self::new(document.display_name);
        if let Some(table) = document.table_name {
            model = model.table_name(table);
        }
        if let Some(pk) = document.primary_key {
            model = model.primary_key(pk);
        }
        for (name, spec) in document.attributes {
            let spec: AttributeSpec = serde_json::from_value(spec)?;
            model = model.with_attribute(name, spec);
        }
        Ok(model)
    }

    /// Override the table name; the identifier is its lower-cased form.
    pub fn table_name(mut self, table: impl AsRef<str>) -> Self {
        self.identifier = table.as_ref().to_lowercase();
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Add or replace an attribute, keeping declaration order.
    pub fn with_attribute(mut self, name: impl Into<String>, mut spec: AttributeSpec) -> Self {
        let name = name.into();
        if spec.relation_target.is_some() {
            spec.kind = AttributeType::Ref;
        }
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = spec,
            None => self.attributes.push((name, spec)),
        }
        self
    }

    /// Append attributes the model does not already declare.
    pub(crate) fn merge_defaults(mut self, defaults: &[(String, AttributeSpec)]) -> Self {
        for (name, spec) in defaults {
            if self.attribute(name).is_none() {
                self = self.with_attribute(name.clone(), spec.clone());
            }
        }
        self
    }

    /// Lower-cased table name.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn primary_key_name(&self) -> &str {
        &self.primary_key
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeSpec)> {
        self.attributes.iter().map(|(n, s)| (n.as_str(), s))
    }
}
