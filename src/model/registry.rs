//! The model registry: every [`ModelDefinition`] known to the query layer.
//!
//! The registry is built once and shared behind an `Arc`. Lookups by display
//! name or identifier are case-insensitive.

use super::{AttributeSpec, ModelDefinition, ModelDocument};
use crate::executor::{PostgresDialect, QuoteIdentifier};
use crate::query::{ModelHandle, QueryError};
use crate::value::{Clock, SystemClock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub enum RegistryError {
    /// Two models share a display name or identifier.
    DuplicateModel(String),
    /// A model document could not be deserialized.
    InvalidDocument(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateModel(name) => write!(f, "Duplicate model: {name}"),
            RegistryError::InvalidDocument(msg) => write!(f, "Invalid model document: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::InvalidDocument(err.to_string())
    }
}

/// Collects definitions and settings for a [`ModelRegistry`].
pub struct RegistryBuilder {
    defaults: Vec<(String, AttributeSpec)>,
    models: Vec<ModelDefinition>,
    quoter: Arc<dyn QuoteIdentifier>,
    clock: Arc<dyn Clock>,
    schema: Option<String>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            defaults: Vec::new(),
            models: Vec::new(),
            quoter: Arc::new(PostgresDialect),
            clock: Arc::new(SystemClock),
            schema: None,
        }
    }
}

impl RegistryBuilder {
    /// Attributes merged into every model; attributes a model declares itself win.
    pub fn default_attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.defaults.push((name.into(), spec));
        self
    }

    /// Global default attributes from a JSON mapping of name → attribute document.
    pub fn default_attributes(mut self, attributes: &Value) -> Result<Self, RegistryError> {
        let map = attributes.as_object().ok_or_else(|| {
            RegistryError::InvalidDocument("default attributes must be a mapping".to_string())
        })?;
        for (name, spec) in map {
            let spec: AttributeSpec = serde_json::from_value(spec.clone())?;
            self.defaults.push((name.clone(), spec));
        }
        Ok(self)
    }

    pub fn model(mut self, model: ModelDefinition) -> Self {
        self.models.push(model);
        self
    }

    /// Add a model from its JSON document.
    pub fn document(self, document: Value) -> Result<Self, RegistryError> {
        let document: ModelDocument = serde_json::from_value(document)?;
        Ok(self.model(ModelDefinition::from_document(document)?))
    }

    pub fn quoter(mut self, quoter: impl QuoteIdentifier + 'static) -> Self {
        self.quoter = Arc::new(quoter);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Schema applied to handles that do not pick one with `in_schema`.
    pub fn default_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    pub fn build(self) -> Result<Arc<ModelRegistry>, RegistryError> {
        let mut models = Vec::with_capacity(self.models.len());
        let mut index = HashMap::new();

        for model in self.models {
            let model = Arc::new(model.merge_defaults(&self.defaults));
            let slot = models.len();
            let display = model.display_name().to_lowercase();
            let identifier = model.identifier().to_string();

            if index.insert(display.clone(), slot).is_some() {
                return Err(RegistryError::DuplicateModel(model.display_name().to_string()));
            }
            if identifier != display && index.insert(identifier, slot).is_some() {
                return Err(RegistryError::DuplicateModel(model.identifier().to_string()));
            }
            log::debug!("registered model {} ({})", model.display_name(), model.identifier());
            models.push(model);
        }

        Ok(Arc::new(ModelRegistry {
            models,
            index,
            quoter: self.quoter,
            clock: self.clock,
            schema: self.schema,
        }))
    }
}

pub struct ModelRegistry {
    models: Vec<Arc<ModelDefinition>>,
    index: HashMap<String, usize>,
    quoter: Arc<dyn QuoteIdentifier>,
    clock: Arc<dyn Clock>,
    schema: Option<String>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.iter().map(|m| m.display_name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a definition by display name or identifier, ignoring case.
    pub fn definition(&self, name: &str) -> Option<&Arc<ModelDefinition>> {
        self.index
            .get(&name.to_lowercase())
            .map(|&slot| &self.models[slot])
    }

    /// Handle for running operations against `name`.
    pub fn model(self: &Arc<Self>, name: &str) -> Result<ModelHandle, QueryError> {
        let model = self
            .definition(name)
            .ok_or_else(|| QueryError::ModelNotFound(name.to_string()))?
            .clone();
        Ok(ModelHandle::new(self.clone(), model))
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDefinition>> {
        self.models.iter()
    }

    pub fn quote(&self, ident: &str) -> String {
        self.quoter.quote_identifier(ident)
    }

    /// Quoted table reference, schema-qualified when a schema is given.
    pub fn table_ref(&self, model: &ModelDefinition, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(model.identifier())),
            None => self.quote(model.identifier()),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}
