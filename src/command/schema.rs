//! Logical-to-physical schema remapping, configured per connection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TranslationError;
use crate::transpiler::{quote_identifier, SqlGenerator};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    /// Physical schema used when a command names none.
    #[serde(default)]
    pub default_schema: Option<String>,
    /// logical -> physical
    #[serde(default)]
    pub mapping: HashMap<String, String>,
}

impl SchemaMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn map(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.mapping.insert(logical.into(), physical.into());
        self
    }

    /// Physical schema for a command's logical schema. Unmapped names pass
    /// through unchanged.
    pub fn resolve<'a>(&'a self, logical: Option<&'a str>) -> Option<&'a str> {
        match logical {
            Some(name) => Some(self.mapping.get(name).map(String::as_str).unwrap_or(name)),
            None => self.default_schema.as_deref(),
        }
    }

    /// Quoted, optionally schema-qualified container name.
    pub fn qualified_name(
        &self,
        generator: &dyn SqlGenerator,
        logical_schema: Option<&str>,
        container: &str,
    ) -> Result<String, TranslationError> {
        let table = quote_identifier(generator, container)?;
        match self.resolve(logical_schema) {
            Some(schema) => Ok(format!("{}.{}", quote_identifier(generator, schema)?, table)),
            None => Ok(table),
        }
    }
}
