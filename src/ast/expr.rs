use crate::ast::Value;
use serde::{Deserialize, Serialize};

/// Binary operators. Comparisons take value operands; `And`/`Or` take predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOp {
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql_symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringOpKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl StringOpKind {
    /// Wrap an already-escaped literal with the wildcards for this kind.
    pub fn pattern(&self, escaped: &str) -> String {
        match self {
            StringOpKind::Contains => format!("%{}%", escaped),
            StringOpKind::StartsWith => format!("{}%", escaped),
            StringOpKind::EndsWith => format!("%{}", escaped),
        }
    }
}

/// A predicate/projection expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Value),
    /// Reference to a field of the target entity, by its logical name.
    MemberRef(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    StringOp {
        kind: StringOpKind,
        member: String,
        literal: Value,
    },
    SetMembership {
        member: String,
        values: Vec<Value>,
    },
    IsNull {
        member: String,
        negated: bool,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `(self AND other)`
    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, other)
    }

    /// `(self OR other)`
    pub fn or(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Name of the node shape, as reported in translation errors.
    pub fn node_kind(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "Constant",
            Expr::MemberRef(_) => "MemberRef",
            Expr::Binary { op, .. } if op.is_logical() => "BinaryOp(logical)",
            Expr::Binary { .. } => "BinaryOp(comparison)",
            Expr::Not(_) => "Not",
            Expr::StringOp { .. } => "StringOp",
            Expr::SetMembership { .. } => "SetMembership",
            Expr::IsNull { .. } => "IsNull",
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Binary { left, right, .. } => 1 + left.node_count() + right.node_count(),
            Expr::Not(inner) => 1 + inner.node_count(),
            _ => 1,
        }
    }
}
