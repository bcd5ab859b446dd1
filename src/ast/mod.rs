//! Expression AST for predicates and projections.
//!
//! The tree is a closed set of node shapes. Anything the translator does not
//! recognise is rejected rather than interpolated as text.

pub mod builders;
pub mod expr;
pub mod values;

pub use builders::*;
pub use expr::{BinaryOp, Expr, StringOpKind};
pub use values::{EnumValue, SqlEnum, Value};
