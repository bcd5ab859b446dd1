//! Expression builders for predicates.
//!
//! ```
//! use sqlroute::ast::*;
//!
//! let pred = and(eq("isActive", true), gt("creditLimit", 5000));
//! assert_eq!(pred.node_count(), 7);
//! ```

use crate::ast::{BinaryOp, Expr, StringOpKind, Value};

/// Create a field reference
pub fn field(name: &str) -> Expr {
    Expr::MemberRef(name.to_string())
}

/// Create a constant
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

fn compare(name: &str, op: BinaryOp, value: Value) -> Expr {
    Expr::binary(op, field(name), Expr::Constant(value))
}

/// field = value
pub fn eq(name: &str, value: impl Into<Value>) -> Expr {
    compare(name, BinaryOp::Eq, value.into())
}

pub fn ne(name: &str, value: impl Into<Value>) -> Expr {
    compare(name, BinaryOp::Ne, value.into())
}

pub fn gt(name: &str, value: impl Into<Value>) -> Expr {
    compare(name, BinaryOp::Gt, value.into())
}

pub fn ge(name: &str, value: impl Into<Value>) -> Expr {
    compare(name, BinaryOp::Ge, value.into())
}

pub fn lt(name: &str, value: impl Into<Value>) -> Expr {
    compare(name, BinaryOp::Lt, value.into())
}

pub fn le(name: &str, value: impl Into<Value>) -> Expr {
    compare(name, BinaryOp::Le, value.into())
}

pub fn contains(name: &str, text: &str) -> Expr {
    string_op(StringOpKind::Contains, name, text)
}

pub fn starts_with(name: &str, text: &str) -> Expr {
    string_op(StringOpKind::StartsWith, name, text)
}

pub fn ends_with(name: &str, text: &str) -> Expr {
    string_op(StringOpKind::EndsWith, name, text)
}

fn string_op(kind: StringOpKind, name: &str, text: &str) -> Expr {
    Expr::StringOp {
        kind,
        member: name.to_string(),
        literal: Value::String(text.to_string()),
    }
}

/// field IN (values...)
pub fn is_in<V: Into<Value>>(name: &str, values: impl IntoIterator<Item = V>) -> Expr {
    Expr::SetMembership {
        member: name.to_string(),
        values: values.into_iter().map(Into::into).collect(),
    }
}

pub fn is_null(name: &str) -> Expr {
    Expr::IsNull {
        member: name.to_string(),
        negated: false,
    }
}

pub fn is_not_null(name: &str) -> Expr {
    Expr::IsNull {
        member: name.to_string(),
        negated: true,
    }
}

pub fn and(left: Expr, right: Expr) -> Expr {
    left.and(right)
}

pub fn or(left: Expr, right: Expr) -> Expr {
    left.or(right)
}

pub fn not(inner: Expr) -> Expr {
    inner.negate()
}

/// Left-fold a list of predicates with AND. `None` when the list is empty.
pub fn all(preds: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    preds.into_iter().reduce(Expr::and)
}

/// Left-fold a list of predicates with OR. `None` when the list is empty.
pub fn any(preds: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    preds.into_iter().reduce(Expr::or)
}
