//! # sqlroute
//!
//! Typed predicates in, parameterized SQL out, executed against named
//! connections with retries and scoped transactions.
//!
//! ## Quick Example
//!
//! ```
//! use sqlroute::prelude::*;
//!
//! let expr = parse_predicate("isActive == true && creditLimit > 5000").unwrap();
//! let stmt = translate(&expr, &PascalCase).unwrap();
//!
//! assert_eq!(stmt.sql, "([IsActive] = @p0 AND [CreditLimit] > @p1)");
//! assert_eq!(stmt.parameter_count(), 2);
//! ```
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`ast`] | Closed expression tree and literal values |
//! | [`parser`] | Text predicates -> expression tree |
//! | [`transpiler`] | Expression tree -> SQL fragment + parameters |
//! | [`command`] | Commands and full-statement assembly |
//! | [`registry`] | Named connection handles |
//! | [`engine`] | Validation, routing, execution, result mapping |
//! | [`transaction`] | Scoped transactions |
//! | [`resilience`] | Retry with backoff for transient faults |

pub mod ast;
pub mod command;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod parser;
pub mod registry;
pub mod resilience;
pub mod transaction;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::command::{
        Command, CommandBuilder, CommandKind, Operation, ReturnShape, SchemaMapping, UpsertKey,
        UpsertSpec,
    };
    pub use crate::config::{ConnectionConfig, EngineConfig, RetrySettings};
    pub use crate::driver::{Driver, DriverError, FaultKind, IsolationLevel, Row, SqlxDriver};
    pub use crate::engine::{CommandEngine, CommandOutcome, PagedResult};
    pub use crate::error::*;
    pub use crate::parser::parse_predicate;
    pub use crate::registry::{ConnectionHandle, ConnectionRegistry, ConnectionSettings, ConnectionState};
    pub use crate::resilience::RetryPolicy;
    pub use crate::transaction::{Transaction, TransactionManager, TransactionState};
    pub use crate::transpiler::{
        translate, translate_with_dialect, Dialect, EntitySchema, FieldResolver, ParameterizedStatement,
        PascalCase, Verbatim,
    };
}

pub use parser::parse_predicate;
pub use transpiler::translate;
