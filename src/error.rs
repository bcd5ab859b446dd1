//! Error types for sqlroute.
//!
//! Expected failures are values, never panics. Each layer has its own enum and
//! they all funnel into [`ExecutionError`] at the engine boundary.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::driver::{DriverError, FaultKind};
use crate::transaction::TransactionState;

/// Failure to parse a text predicate.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Parse error at position {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Failure to translate an expression tree into SQL.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslationError {
    /// Node shape outside the supported set (or in an unsupported position).
    #[error("Unsupported expression: {node_kind}")]
    UnsupportedExpression { node_kind: String },

    /// Field name not known to the resolver.
    #[error("Unknown field: '{0}'")]
    UnknownField(String),

    /// Operand of the wrong type, e.g. a non-string literal for `Contains`.
    #[error("Invalid operand for {node_kind}: expected {expected}, got {found}")]
    InvalidOperand {
        node_kind: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),
}

impl TranslationError {
    pub fn unsupported(node_kind: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            node_kind: node_kind.into(),
        }
    }
}

/// Failure to assemble a full statement from a command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("Paged query on '{container}' requires an ordering field")]
    MissingOrdering { container: String },

    #[error("{kind} on '{container}' requires a WHERE clause")]
    UnscopedMutation { kind: &'static str, container: String },

    #[error("Upsert on '{container}' is missing its {branch} branch")]
    IncompleteUpsert {
        container: String,
        branch: &'static str,
    },

    #[error("{kind} on '{container}' has no fields to write")]
    EmptyPayload { kind: &'static str, container: String },

    #[error("{kind} does not accept a {clause} clause")]
    UnsupportedClause {
        kind: &'static str,
        clause: &'static str,
    },

    #[error("Invalid paging: {0}")]
    InvalidPaging(String),

    #[error("Duplicate parameter name '{0}'")]
    DuplicateParameter(String),

    #[error(transparent)]
    Translation(#[from] TranslationError),
}

/// Transaction state violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    #[error("Transaction is {state}, expected Active")]
    InvalidState { state: TransactionState },

    #[error("Nested transactions are not supported (connection '{0}' already has an active transaction)")]
    NestedNotSupported(String),

    #[error("Transaction timed out after {0:?}")]
    TimedOut(Duration),
}

/// Bad or unusable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Connection '{name}': {message}")]
    Invalid { name: String, message: String },

    #[error("Connection '{0}' is configured more than once")]
    Duplicate(String),

    #[error("Connection '{name}' could not be created: {source}")]
    Driver {
        name: String,
        #[source]
        source: DriverError,
    },
}

/// Closed classification of every failure the engine can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Translation,
    Build,
    ConnectionNotFound,
    ConnectionUnavailable,
    ConnectionBusy,
    TransientExecution,
    NonTransientExecution,
    Cancelled,
    TransactionState,
    Mapping,
}

/// The `{ kind, message }` failure record handed across the public boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// The main error type for command execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Malformed command, rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Connection '{0}' is not registered")]
    ConnectionNotFound(String),

    #[error("Connection '{connection}' is unavailable: {message}")]
    ConnectionUnavailable { connection: String, message: String },

    #[error("Connection '{0}' is bound to an active transaction")]
    ConnectionBusy(String),

    #[error("{command} on '{connection}' failed ({fault}): {message}")]
    Transient {
        command: String,
        connection: String,
        fault: FaultKind,
        message: String,
    },

    #[error("{command} on '{connection}' failed ({fault}): {message}")]
    NonTransient {
        command: String,
        connection: String,
        fault: FaultKind,
        message: String,
    },

    #[error("{command} on '{connection}' was cancelled")]
    Cancelled { command: String, connection: String },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Rows came back but could not be shaped into the requested type.
    #[error("Result mapping error: {0}")]
    Mapping(String),
}

impl From<TranslationError> for ExecutionError {
    fn from(e: TranslationError) -> Self {
        ExecutionError::Build(BuildError::Translation(e))
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Build(BuildError::Translation(_)) => ErrorKind::Translation,
            Self::Build(_) => ErrorKind::Build,
            Self::ConnectionNotFound(_) => ErrorKind::ConnectionNotFound,
            Self::ConnectionUnavailable { .. } => ErrorKind::ConnectionUnavailable,
            Self::ConnectionBusy(_) => ErrorKind::ConnectionBusy,
            Self::Transient { .. } => ErrorKind::TransientExecution,
            Self::NonTransient { .. } => ErrorKind::NonTransientExecution,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Transaction(_) => ErrorKind::TransactionState,
            Self::Mapping(_) => ErrorKind::Mapping,
        }
    }

    /// Whether the resilience layer may retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectionNotFound
                | ErrorKind::ConnectionUnavailable
                | ErrorKind::TransientExecution
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type alias for engine operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;
