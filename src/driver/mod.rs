//! Driver seam.
//!
//! The engine talks to a datastore only through [`Driver`] and
//! [`DriverTransaction`]. Pooling, wire protocol and type conversion live
//! behind these traits. [`SqlxDriver`] is the bundled implementation.

pub mod any;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transpiler::{Dialect, ParameterizedStatement};

pub use any::SqlxDriver;

/// One result row, column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    /// SQL Server row versioning. Other dialects treat it as RepeatableRead.
    Snapshot,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Classified cause of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    Connection,
    Timeout,
    Deadlock,
    Network,
    Constraint,
    Syntax,
    Permission,
    Other,
}

impl FaultKind {
    /// Connection, timeout, deadlock and network faults may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FaultKind::Connection | FaultKind::Timeout | FaultKind::Deadlock | FaultKind::Network
        )
    }

    /// Classify a PostgreSQL SQLSTATE.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" | "40001" => FaultKind::Deadlock,
            "57014" | "55P03" => FaultKind::Timeout,
            "53300" | "57P01" | "57P02" | "57P03" => FaultKind::Connection,
            "42501" => FaultKind::Permission,
            c if c.starts_with("08") => FaultKind::Connection,
            c if c.starts_with("23") => FaultKind::Constraint,
            c if c.starts_with("42") => FaultKind::Syntax,
            _ => FaultKind::Other,
        }
    }

    /// Classify a SQLite primary or extended result code.
    pub fn from_sqlite_code(code: &str) -> Self {
        let Ok(n) = code.parse::<i32>() else {
            return FaultKind::Other;
        };
        // Extended codes carry the primary code in the low byte.
        match n & 0xff {
            5 => FaultKind::Timeout,   // SQLITE_BUSY
            6 => FaultKind::Deadlock,  // SQLITE_LOCKED
            10 => FaultKind::Network,  // SQLITE_IOERR
            14 => FaultKind::Connection,
            19 => FaultKind::Constraint,
            23 => FaultKind::Permission,
            1 => FaultKind::Syntax,
            _ => FaultKind::Other,
        }
    }

    /// Classify a SQL Server error number.
    pub fn from_sql_server_number(number: i32) -> Self {
        match number {
            1205 => FaultKind::Deadlock,
            -2 | 1222 => FaultKind::Timeout,
            4060 | 40197 | 40501 | 40613 | 49918 | 49919 | 49920 => FaultKind::Connection,
            10053 | 10054 | 10060 | 233 | 64 => FaultKind::Network,
            2627 | 2601 | 547 | 515 => FaultKind::Constraint,
            102 | 156 | 207 | 208 => FaultKind::Syntax,
            229 | 230 | 262 => FaultKind::Permission,
            _ => FaultKind::Other,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::Connection => "connection",
            FaultKind::Timeout => "timeout",
            FaultKind::Deadlock => "deadlock",
            FaultKind::Network => "network",
            FaultKind::Constraint => "constraint",
            FaultKind::Syntax => "syntax",
            FaultKind::Permission => "permission",
            FaultKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Failure reported by a driver.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: FaultKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// A pooled datastore behind one registered connection name.
#[async_trait]
pub trait Driver: Send + Sync {
    /// e.g. `postgres`, `sqlite`
    fn provider_name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    async fn open(&self) -> Result<(), DriverError>;

    async fn close(&self);

    /// Cheap liveness check.
    async fn test(&self) -> Result<bool, DriverError>;

    async fn fetch(&self, stmt: &ParameterizedStatement) -> Result<Vec<Row>, DriverError>;

    /// Returns affected rows.
    async fn execute(&self, stmt: &ParameterizedStatement) -> Result<u64, DriverError>;

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn DriverTransaction>, DriverError>;
}

/// An open transaction pinned to one physical connection.
#[async_trait]
pub trait DriverTransaction: Send {
    async fn fetch(&mut self, stmt: &ParameterizedStatement) -> Result<Vec<Row>, DriverError>;

    async fn execute(&mut self, stmt: &ParameterizedStatement) -> Result<u64, DriverError>;

    async fn commit(self: Box<Self>) -> Result<(), DriverError>;

    async fn rollback(self: Box<Self>) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classification() {
        assert_eq!(FaultKind::from_sqlstate("40P01"), FaultKind::Deadlock);
        assert_eq!(FaultKind::from_sqlstate("08006"), FaultKind::Connection);
        assert_eq!(FaultKind::from_sqlstate("23505"), FaultKind::Constraint);
        assert_eq!(FaultKind::from_sqlstate("42P01"), FaultKind::Syntax);
        assert_eq!(FaultKind::from_sqlstate("42501"), FaultKind::Permission);
        assert!(FaultKind::from_sqlstate("57014").is_transient());
        assert!(!FaultKind::from_sqlstate("23505").is_transient());
    }

    #[test]
    fn test_sqlite_extended_codes() {
        assert_eq!(FaultKind::from_sqlite_code("2067"), FaultKind::Constraint);
        assert_eq!(FaultKind::from_sqlite_code("517"), FaultKind::Timeout);
        assert_eq!(FaultKind::from_sqlite_code("1"), FaultKind::Syntax);
        assert_eq!(FaultKind::from_sqlite_code("abc"), FaultKind::Other);
    }

    #[test]
    fn test_sql_server_numbers() {
        assert_eq!(FaultKind::from_sql_server_number(1205), FaultKind::Deadlock);
        assert_eq!(FaultKind::from_sql_server_number(-2), FaultKind::Timeout);
        assert_eq!(FaultKind::from_sql_server_number(2627), FaultKind::Constraint);
        assert_eq!(FaultKind::from_sql_server_number(50000), FaultKind::Other);
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(FaultKind::Deadlock.to_string(), "deadlock");
        let err = DriverError::new(FaultKind::Timeout, "statement timed out");
        assert_eq!(err.to_string(), "timeout: statement timed out");
    }
}
