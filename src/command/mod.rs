//! Commands: immutable descriptions of one unit of work against a named
//! connection.
//!
//! A [`Command`] is built with the constructor functions in
//! [`constructors`], checked by [`Command::validate`] before any I/O, and
//! rendered into SQL by [`builder::build_statement`].

pub mod builder;
pub mod constructors;
pub mod schema;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ast::{Expr, Value};
use crate::error::{BuildError, ExecutionError};
use crate::transpiler::{FieldResolver, ParameterizedStatement, PascalCase};

pub use builder::build_statement;
pub use constructors::CommandBuilder;
pub use schema::SchemaMapping;

/// Coarse command category, used for retry policy and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Query,
    Insert,
    Update,
    Delete,
    Upsert,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Query => "Query",
            CommandKind::Insert => "Insert",
            CommandKind::Update => "Update",
            CommandKind::Delete => "Delete",
            CommandKind::Upsert => "Upsert",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, CommandKind::Query)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an INSERT hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReturnShape {
    /// Affected-row count only.
    #[default]
    None,
    /// The full inserted row (or the projected columns).
    Row,
    /// Only the identity column.
    Identity,
}

/// Key an upsert matches existing rows on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpsertKey {
    /// The command's identity field.
    Identity,
    /// One or more caller-chosen fields.
    Natural(Vec<String>),
}

/// Both branches of an upsert. Neither may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertSpec {
    pub key: UpsertKey,
    /// Values written when no row matches the key.
    pub insert: Vec<(String, Value)>,
    /// Assignments applied when a row matches the key.
    pub update: Vec<(String, Value)>,
}

impl UpsertSpec {
    pub fn on_identity() -> Self {
        Self {
            key: UpsertKey::Identity,
            insert: Vec::new(),
            update: Vec::new(),
        }
    }

    pub fn on_natural_key<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            key: UpsertKey::Natural(fields.into_iter().map(Into::into).collect()),
            insert: Vec::new(),
            update: Vec::new(),
        }
    }

    pub fn when_not_matched<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.insert = collect_fields(values);
        self
    }

    pub fn when_matched<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.update = collect_fields(values);
        self
    }
}

pub(crate) fn collect_fields<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Vec<(String, Value)>
where
    K: Into<String>,
    V: Into<Value>,
{
    values
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// The statement shape a command asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Single row by identity.
    Find { id: Value },
    /// Filtered, optionally ordered and paged query.
    Select,
    Count,
    Exists,
    Insert {
        values: Vec<(String, Value)>,
        returning: ReturnShape,
    },
    Update { assignments: Vec<(String, Value)> },
    Delete,
    Upsert(UpsertSpec),
}

impl Operation {
    pub fn kind(&self) -> CommandKind {
        match self {
            Operation::Find { .. } | Operation::Select | Operation::Count | Operation::Exists => {
                CommandKind::Query
            }
            Operation::Insert { .. } => CommandKind::Insert,
            Operation::Update { .. } => CommandKind::Update,
            Operation::Delete => CommandKind::Delete,
            Operation::Upsert(_) => CommandKind::Upsert,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Find { .. } => "Find",
            Operation::Select => "Select",
            Operation::Count => "Count",
            Operation::Exists => "Exists",
            Operation::Insert { .. } => "Insert",
            Operation::Update { .. } => "Update",
            Operation::Delete => "Delete",
            Operation::Upsert(_) => "Upsert",
        }
    }
}

/// WHERE clause source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Translated from an expression tree.
    Expr(Expr),
    /// Hand-built fragment. Its parameters keep their names and take the
    /// first positions of the final statement.
    Raw(ParameterizedStatement),
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        match self {
            Filter::Expr(_) => false,
            Filter::Raw(stmt) => stmt.sql.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub offset: u64,
    pub page_size: u64,
}

fn default_resolver() -> Arc<dyn FieldResolver> {
    Arc::new(PascalCase)
}

fn default_identity() -> String {
    "Id".to_string()
}

/// One unit of work. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    command_id: Uuid,
    correlation_id: Uuid,
    connection_name: String,
    container: String,
    schema: Option<String>,
    operation: Operation,
    filter: Option<Filter>,
    columns: Vec<String>,
    order_by: Option<OrderBy>,
    paging: Option<Paging>,
    #[serde(default = "default_identity")]
    identity_field: String,
    idempotent: bool,
    timeout: Option<Duration>,
    #[serde(skip, default = "default_resolver")]
    resolver: Arc<dyn FieldResolver>,
}

impl Command {
    pub(crate) fn new(
        connection_name: impl Into<String>,
        container: impl Into<String>,
        operation: Operation,
    ) -> Self {
        let command_id = Uuid::new_v4();
        Self {
            command_id,
            correlation_id: command_id,
            connection_name: connection_name.into(),
            container: container.into(),
            schema: None,
            operation,
            filter: None,
            columns: Vec::new(),
            order_by: None,
            paging: None,
            identity_field: default_identity(),
            idempotent: false,
            timeout: None,
            resolver: default_resolver(),
        }
    }

    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Logical schema override.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> CommandKind {
        self.operation.kind()
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref().filter(|f| !f.is_empty())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    pub fn paging(&self) -> Option<Paging> {
        self.paging
    }

    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn resolver(&self) -> &dyn FieldResolver {
        self.resolver.as_ref()
    }

    /// Reads always retry; mutations only when marked idempotent.
    pub fn is_retryable(&self) -> bool {
        !self.kind().is_mutation() || self.idempotent
    }

    /// Reject a malformed command before any I/O.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.connection_name.trim().is_empty() {
            return Err(ExecutionError::validation("command has no connection name"));
        }
        if self.container.trim().is_empty() {
            return Err(ExecutionError::validation("command has no target container"));
        }
        if matches!(self.schema.as_deref(), Some(s) if s.trim().is_empty()) {
            return Err(ExecutionError::validation("schema override is blank"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ExecutionError::validation("command timeout must be non-zero"));
        }
        self.check_shape()?;
        Ok(())
    }

    /// Structural rules on clause combinations.
    pub(crate) fn check_shape(&self) -> Result<(), BuildError> {
        let name = self.operation.name();
        let container = || self.container.clone();

        if !matches!(self.operation, Operation::Select) {
            if self.paging.is_some() {
                return Err(BuildError::UnsupportedClause { kind: name, clause: "paging" });
            }
            if self.order_by.is_some() {
                return Err(BuildError::UnsupportedClause { kind: name, clause: "ordering" });
            }
        }

        match &self.operation {
            Operation::Select => {
                if let Some(paging) = self.paging {
                    if paging.page_size == 0 {
                        return Err(BuildError::InvalidPaging(
                            "page size must be greater than zero".into(),
                        ));
                    }
                    if self.order_by.is_none() {
                        return Err(BuildError::MissingOrdering { container: container() });
                    }
                }
            }
            Operation::Find { .. } | Operation::Count | Operation::Exists => {}
            Operation::Insert { values, .. } => {
                if self.filter.is_some() {
                    return Err(BuildError::UnsupportedClause { kind: name, clause: "filter" });
                }
                if values.is_empty() {
                    return Err(BuildError::EmptyPayload { kind: name, container: container() });
                }
            }
            Operation::Update { assignments } => {
                if assignments.is_empty() {
                    return Err(BuildError::EmptyPayload { kind: name, container: container() });
                }
                if self.filter().is_none() {
                    return Err(BuildError::UnscopedMutation { kind: name, container: container() });
                }
            }
            Operation::Delete => {
                if self.filter().is_none() {
                    return Err(BuildError::UnscopedMutation { kind: name, container: container() });
                }
            }
            Operation::Upsert(spec) => {
                if self.filter.is_some() {
                    return Err(BuildError::UnsupportedClause { kind: name, clause: "filter" });
                }
                if spec.insert.is_empty() {
                    return Err(BuildError::IncompleteUpsert {
                        container: container(),
                        branch: "not-matched (insert)",
                    });
                }
                if spec.update.is_empty() {
                    return Err(BuildError::IncompleteUpsert {
                        container: container(),
                        branch: "matched (update)",
                    });
                }
                // Compare resolved columns so `id` and `Id` name the same key.
                // Unresolvable names are left for the statement builder to report.
                let insert_cols: Vec<String> = spec
                    .insert
                    .iter()
                    .filter_map(|(f, _)| self.resolver.resolve(f).ok())
                    .collect();
                let keys = self.upsert_key_fields(spec);
                let key_missing = keys.is_empty()
                    || keys.iter().any(|k| match self.resolver.resolve(k) {
                        Ok(col) => !insert_cols.contains(&col),
                        Err(_) => false,
                    });
                if key_missing {
                    return Err(BuildError::IncompleteUpsert {
                        container: container(),
                        branch: "key",
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn upsert_key_fields<'a>(&'a self, spec: &'a UpsertSpec) -> Vec<&'a str> {
        match &spec.key {
            UpsertKey::Identity => vec![self.identity_field.as_str()],
            UpsertKey::Natural(fields) => fields.iter().map(String::as_str).collect(),
        }
    }

    /// COUNT over the same container and filter, for paged totals.
    pub(crate) fn to_count(&self) -> Command {
        Command {
            command_id: Uuid::new_v4(),
            operation: Operation::Count,
            columns: Vec::new(),
            order_by: None,
            paging: None,
            ..self.clone()
        }
    }
}
