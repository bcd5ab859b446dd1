//! Field-name resolution: logical field names to physical column names.

use std::collections::HashMap;
use std::fmt;

use crate::error::TranslationError;

/// Maps a logical field name (as written in predicates) to a column name.
pub trait FieldResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, field: &str) -> Result<String, TranslationError>;
}

fn check_identifier(field: &str) -> Result<(), TranslationError> {
    let mut chars = field.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TranslationError::InvalidIdentifier(field.to_string()))
    }
}

/// `isActive` -> `IsActive`. The default resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct PascalCase;

impl FieldResolver for PascalCase {
    fn resolve(&self, field: &str) -> Result<String, TranslationError> {
        check_identifier(field)?;
        let mut chars = field.chars();
        Ok(match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        })
    }
}

/// Uses the field name unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Verbatim;

impl FieldResolver for Verbatim {
    fn resolve(&self, field: &str) -> Result<String, TranslationError> {
        check_identifier(field)?;
        Ok(field.to_string())
    }
}

/// Explicit field map for one entity. Unknown fields are an error.
///
/// ```
/// use sqlroute::transpiler::{EntitySchema, FieldResolver};
///
/// let schema = EntitySchema::new("Customer")
///     .field("isActive", "is_active")
///     .field("name", "full_name");
/// assert_eq!(schema.resolve("isActive").unwrap(), "is_active");
/// assert!(schema.resolve("password").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    entity: String,
    fields: HashMap<String, String>,
}

impl EntitySchema {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: HashMap::new(),
        }
    }

    /// Register a field with an explicit column name.
    pub fn field(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.insert(name.into(), column.into());
        self
    }

    /// Register fields whose columns are the PascalCase form of the name.
    pub fn pascal_fields<'a>(
        mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, TranslationError> {
        for name in names {
            let column = PascalCase.resolve(name)?;
            self.fields.insert(name.to_string(), column);
        }
        Ok(self)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

impl FieldResolver for EntitySchema {
    fn resolve(&self, field: &str) -> Result<String, TranslationError> {
        self.fields
            .get(field)
            .cloned()
            .ok_or_else(|| TranslationError::UnknownField(field.to_string()))
    }
}
