//! SQL dialects.
//!
//! Every dialect-specific piece of text goes through [`SqlGenerator`]. The
//! statement builder and the translator never hard-code quoting, placeholders
//! or paging syntax.

use serde::{Deserialize, Serialize};

use crate::ast::Value;
use crate::error::TranslationError;

/// Which flavour of SQL to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `[ident]`, `@p0`, `OFFSET .. FETCH NEXT`, `MERGE`
    #[default]
    SqlServer,
    /// `"ident"`, `$1`, `LIMIT/OFFSET`, `ON CONFLICT`
    Postgres,
    /// `"ident"`, `?1`, `LIMIT/OFFSET`, `ON CONFLICT`
    Sqlite,
}

impl Dialect {
    pub fn generator(&self) -> &'static dyn SqlGenerator {
        match self {
            Dialect::SqlServer => &SqlServerGenerator,
            Dialect::Postgres => &PostgresGenerator,
            Dialect::Sqlite => &SqliteGenerator,
        }
    }
}

/// How a dialect expresses insert-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    Merge,
    OnConflict,
}

/// Where a dialect puts the clause returning inserted data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReturningClause {
    /// Between the column list and `VALUES`.
    pub before_values: Option<String>,
    /// After the `VALUES (...)` list.
    pub after_values: Option<String>,
}

/// Trait for dialect-specific SQL generation.
pub trait SqlGenerator: Send + Sync {
    /// Quote an identifier (table, schema or column name). Always quotes.
    fn quote_identifier(&self, name: &str) -> String;

    /// Placeholder for the parameter at `index` (0-based position in the list).
    fn placeholder(&self, index: usize) -> String;

    /// Placeholder for `value` at `index`. Dialects whose driver sends some
    /// values as text wrap the placeholder in a cast to the column type.
    fn typed_placeholder(&self, index: usize, _value: &Value) -> String {
        self.placeholder(index)
    }

    /// Paging suffix, including the leading space.
    fn paging(&self, offset: u64, page_size: u64) -> String;

    /// `SELECT` head for a single-row lookup.
    fn select_single_head(&self) -> &'static str {
        "SELECT "
    }

    /// Suffix for a single-row lookup, including the leading space.
    fn select_single_tail(&self) -> &'static str {
        " LIMIT 1"
    }

    /// Clause returning quoted `columns` from an INSERT. Empty means all.
    fn returning(&self, columns: &[String]) -> ReturningClause {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };
        ReturningClause {
            before_values: None,
            after_values: Some(format!("RETURNING {}", projection)),
        }
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnConflict
    }

    /// Escape LIKE metacharacters in user text so they match literally.
    fn escape_like(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(c, '\\' | '%' | '_') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    /// Suffix naming the LIKE escape character, including the leading space.
    fn like_escape_clause(&self) -> &'static str {
        " ESCAPE '\\'"
    }
}

/// The single entry point for identifier quoting.
///
/// Rejects names that cannot be a real identifier before quoting them.
pub fn quote_identifier(generator: &dyn SqlGenerator, name: &str) -> Result<String, TranslationError> {
    if name.trim().is_empty() || name.chars().any(|c| c.is_control()) {
        return Err(TranslationError::InvalidIdentifier(name.to_string()));
    }
    Ok(generator.quote_identifier(name))
}

pub struct SqlServerGenerator;

impl SqlGenerator for SqlServerGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn paging(&self, offset: u64, page_size: u64) -> String {
        format!(" OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, page_size)
    }

    fn select_single_head(&self) -> &'static str {
        "SELECT TOP (1) "
    }

    fn select_single_tail(&self) -> &'static str {
        ""
    }

    fn returning(&self, columns: &[String]) -> ReturningClause {
        let output = if columns.is_empty() {
            "OUTPUT INSERTED.*".to_string()
        } else {
            let cols: Vec<String> = columns.iter().map(|c| format!("INSERTED.{}", c)).collect();
            format!("OUTPUT {}", cols.join(", "))
        };
        ReturningClause {
            before_values: Some(output),
            after_values: None,
        }
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::Merge
    }

    fn escape_like(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            // '[' opens a character class in T-SQL patterns
            if matches!(c, '\\' | '%' | '_' | '[') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

pub struct PostgresGenerator;

impl SqlGenerator for PostgresGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    // uuid and timestamp values are bound as text
    fn typed_placeholder(&self, index: usize, value: &Value) -> String {
        match value {
            Value::Uuid(_) => format!("CAST(${} AS uuid)", index + 1),
            Value::Timestamp(_) => format!("CAST(${} AS timestamptz)", index + 1),
            _ => self.placeholder(index),
        }
    }

    fn paging(&self, offset: u64, page_size: u64) -> String {
        format!(" LIMIT {} OFFSET {}", page_size, offset)
    }
}

pub struct SqliteGenerator;

impl SqlGenerator for SqliteGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index + 1)
    }

    fn paging(&self, offset: u64, page_size: u64) -> String {
        format!(" LIMIT {} OFFSET {}", page_size, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_escapes_delimiters() {
        assert_eq!(SqlServerGenerator.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(PostgresGenerator.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_rejects_blank_names() {
        let err = quote_identifier(Dialect::SqlServer.generator(), "  ").unwrap_err();
        assert_eq!(err, TranslationError::InvalidIdentifier("  ".into()));
        assert!(quote_identifier(Dialect::SqlServer.generator(), "a\nb").is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::SqlServer.generator().placeholder(0), "@p0");
        assert_eq!(Dialect::Postgres.generator().placeholder(0), "$1");
        assert_eq!(Dialect::Sqlite.generator().placeholder(2), "?3");
    }

    #[test]
    fn test_postgres_casts_text_bound_values() {
        let pg = Dialect::Postgres.generator();
        let id = Value::Uuid(uuid::Uuid::nil());
        let at = Value::Timestamp(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
        assert_eq!(pg.typed_placeholder(0, &id), "CAST($1 AS uuid)");
        assert_eq!(pg.typed_placeholder(1, &at), "CAST($2 AS timestamptz)");
        assert_eq!(pg.typed_placeholder(2, &Value::Int(5)), "$3");

        assert_eq!(Dialect::SqlServer.generator().typed_placeholder(0, &id), "@p0");
        assert_eq!(Dialect::Sqlite.generator().typed_placeholder(0, &at), "?1");
    }

    #[test]
    fn test_returning_clause_position() {
        let cols = vec!["[Id]".to_string(), "[Name]".to_string()];
        let clause = SqlServerGenerator.returning(&cols);
        assert_eq!(clause.before_values.as_deref(), Some("OUTPUT INSERTED.[Id], INSERTED.[Name]"));
        assert_eq!(clause.after_values, None);

        let clause = SqliteGenerator.returning(&[]);
        assert_eq!(clause.after_values.as_deref(), Some("RETURNING *"));
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(SqlServerGenerator.escape_like("50%_[x]"), "50\\%\\_\\[x]");
        assert_eq!(PostgresGenerator.escape_like("a\\b"), "a\\\\b");
    }
}
