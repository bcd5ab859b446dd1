//! Expression translator.
//!
//! Walks an [`Expr`] tree pre-order, left to right, and emits a SQL fragment
//! plus the ordered parameter list. Every literal becomes a parameter at the
//! moment it is visited, so the same tree shape always yields the same text
//! and the same parameter names (`p0`, `p1`, ...).

pub mod dialect;
pub mod resolver;


use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Expr, Value};
use crate::error::TranslationError;

pub use dialect::{Dialect, SqlGenerator, quote_identifier};
pub use resolver::{EntitySchema, FieldResolver, PascalCase, Verbatim};

/// One bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name without dialect prefix, e.g. `p0`.
    pub name: String,
    pub value: Value,
}

/// SQL text with placeholders plus the out-of-band parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterizedStatement {
    pub sql: String,
    pub parameters: Vec<Parameter>,
}

impl ParameterizedStatement {
    pub fn new(sql: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// Hand-written SQL with no parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Append a named parameter (hand-built statements).
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// `(name, value)` pairs in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.parameters.iter().map(|p| (p.name.as_str(), &p.value))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.parameters.iter().map(|p| &p.value)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

/// Collects parameters while a statement is being built.
#[derive(Debug, Default)]
pub struct ParamContext {
    params: Vec<Parameter>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a value and return the placeholder for it.
    pub fn add_param(&mut self, value: Value, generator: &dyn SqlGenerator) -> String {
        let index = self.params.len();
        let value = value.into_parameter();
        let placeholder = generator.typed_placeholder(index, &value);
        self.params.push(Parameter {
            name: format!("p{}", index),
            value,
        });
        placeholder
    }

    /// Append parameters from a hand-built fragment, keeping their names.
    pub fn extend_raw(&mut self, params: &[Parameter]) {
        for p in params {
            self.params.push(Parameter {
                name: p.name.clone(),
                value: p.value.clone().into_parameter(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_params(self) -> Vec<Parameter> {
        self.params
    }
}

/// Text emitted for a predicate that can never match (empty IN list).
pub const ALWAYS_FALSE: &str = "1 = 0";

/// Stateful translator for one statement.
pub struct Translator<'a> {
    resolver: &'a dyn FieldResolver,
    generator: &'static dyn SqlGenerator,
    params: ParamContext,
}

impl<'a> Translator<'a> {
    pub fn new(resolver: &'a dyn FieldResolver, dialect: Dialect) -> Self {
        Self {
            resolver,
            generator: dialect.generator(),
            params: ParamContext::new(),
        }
    }

    pub fn generator(&self) -> &'static dyn SqlGenerator {
        self.generator
    }

    pub fn params_mut(&mut self) -> &mut ParamContext {
        &mut self.params
    }

    /// Resolve a logical field name and quote the resulting column.
    pub fn column(&self, field: &str) -> Result<String, TranslationError> {
        let column = self.resolver.resolve(field)?;
        quote_identifier(self.generator, &column)
    }

    /// Column list for SELECT. Empty means `*`.
    pub fn projection(&self, fields: &[String]) -> Result<String, TranslationError> {
        if fields.is_empty() {
            return Ok("*".to_string());
        }
        let cols = fields
            .iter()
            .map(|f| self.column(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cols.join(", "))
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, value: Value) -> String {
        self.params.add_param(value, self.generator)
    }

    /// Translate a boolean-valued expression.
    pub fn predicate(&mut self, expr: &Expr) -> Result<String, TranslationError> {
        match expr {
            Expr::Binary { op, left, right } if op.is_logical() => {
                let l = self.predicate(left)?;
                let r = self.predicate(right)?;
                Ok(format!("({} {} {})", l, op.sql_symbol(), r))
            }
            Expr::Binary { op, left, right } => self.comparison(*op, left, right),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.predicate(inner)?)),
            Expr::StringOp {
                kind,
                member,
                literal,
            } => {
                let col = self.column(member)?;
                let text = match literal {
                    Value::String(s) => s,
                    other => {
                        return Err(TranslationError::InvalidOperand {
                            node_kind: "StringOp",
                            expected: "string",
                            found: other.type_name(),
                        });
                    }
                };
                let pattern = kind.pattern(&self.generator.escape_like(text));
                let placeholder = self.bind(Value::String(pattern));
                Ok(format!(
                    "{} LIKE {}{}",
                    col,
                    placeholder,
                    self.generator.like_escape_clause()
                ))
            }
            Expr::SetMembership { member, values } => {
                let col = self.column(member)?;
                // Empty set matches nothing; never widen to "all rows".
                if values.is_empty() {
                    return Ok(ALWAYS_FALSE.to_string());
                }
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.bind(v.clone())).collect();
                Ok(format!("{} IN ({})", col, placeholders.join(", ")))
            }
            Expr::IsNull { member, negated } => {
                let col = self.column(member)?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{} IS {}NULL", col, not))
            }
            // A bare boolean field in predicate position: `isActive`
            Expr::MemberRef(name) => {
                let col = self.column(name)?;
                let placeholder = self.bind(Value::Bool(true));
                Ok(format!("{} = {}", col, placeholder))
            }
            Expr::Constant(_) => Err(TranslationError::unsupported("Constant as predicate")),
        }
    }

    fn comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<String, TranslationError> {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let member = match (left, right) {
                (Expr::MemberRef(m), Expr::Constant(Value::Null))
                | (Expr::Constant(Value::Null), Expr::MemberRef(m)) => Some(m),
                _ => None,
            };
            if let Some(m) = member {
                let col = self.column(m)?;
                let not = if op == BinaryOp::Ne { "NOT " } else { "" };
                return Ok(format!("{} IS {}NULL", col, not));
            }
        }

        let l = self.operand(left)?;
        let r = self.operand(right)?;
        Ok(format!("{} {} {}", l, op.sql_symbol(), r))
    }

    fn operand(&mut self, expr: &Expr) -> Result<String, TranslationError> {
        match expr {
            Expr::MemberRef(name) => self.column(name),
            Expr::Constant(Value::Null) => Err(TranslationError::InvalidOperand {
                node_kind: "BinaryOp(comparison)",
                expected: "non-null constant",
                found: "null",
            }),
            Expr::Constant(v) => Ok(self.bind(v.clone())),
            other => Err(TranslationError::unsupported(format!(
                "{} as comparison operand",
                other.node_kind()
            ))),
        }
    }

    pub fn into_params(self) -> ParamContext {
        self.params
    }

    /// Finish with `sql` as the statement text.
    pub fn finish(self, sql: String) -> ParameterizedStatement {
        ParameterizedStatement::new(sql, self.params.into_params())
    }
}

/// Translate a predicate using the default (SQL Server) dialect.
///
/// ```
/// use sqlroute::ast::*;
/// use sqlroute::transpiler::{translate, PascalCase};
///
/// let pred = and(eq("isActive", true), gt("creditLimit", 5000));
/// let stmt = translate(&pred, &PascalCase).unwrap();
/// assert_eq!(stmt.sql, "([IsActive] = @p0 AND [CreditLimit] > @p1)");
/// assert_eq!(stmt.parameters[1].value, Value::Int(5000));
/// ```
pub fn translate(
    expr: &Expr,
    resolver: &dyn FieldResolver,
) -> Result<ParameterizedStatement, TranslationError> {
    translate_with_dialect(expr, resolver, Dialect::SqlServer)
}

pub fn translate_with_dialect(
    expr: &Expr,
    resolver: &dyn FieldResolver,
    dialect: Dialect,
) -> Result<ParameterizedStatement, TranslationError> {
    let mut translator = Translator::new(resolver, dialect);
    let sql = translator.predicate(expr)?;
    Ok(translator.finish(sql))
}
