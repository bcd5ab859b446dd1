//! Statement builder: renders a [`Command`] into a [`ParameterizedStatement`].
//!
//! All quoting goes through the dialect's generator and every value is bound
//! through the translator, so parameter names stay unique and ordered.

use std::collections::HashSet;

use crate::ast::Value;
use crate::command::{Command, Filter, Operation, ReturnShape, SchemaMapping, UpsertSpec};
use crate::error::BuildError;
use crate::transpiler::dialect::{ReturningClause, UpsertStyle};
use crate::transpiler::{Dialect, ParameterizedStatement, Translator};

/// Build the full statement for `command`.
pub fn build_statement(
    command: &Command,
    dialect: Dialect,
    schemas: &SchemaMapping,
) -> Result<ParameterizedStatement, BuildError> {
    command.check_shape()?;

    let mut t = Translator::new(command.resolver(), dialect);
    let table = schemas.qualified_name(t.generator(), command.schema(), command.container())?;

    // Hand-built parameters take the first positions.
    if let Some(Filter::Raw(raw)) = command.filter() {
        t.params_mut().extend_raw(&raw.parameters);
    }

    let sql = match command.operation() {
        Operation::Select => build_select(command, &mut t, &table)?,
        Operation::Find { id } => build_find(command, &mut t, &table, id)?,
        Operation::Count => {
            let where_sql = where_clause(command, &mut t)?;
            format!("SELECT COUNT(*) FROM {}{}", table, where_sql)
        }
        Operation::Exists => {
            let where_sql = where_clause(command, &mut t)?;
            format!(
                "SELECT CASE WHEN EXISTS (SELECT 1 FROM {}{}) THEN 1 ELSE 0 END",
                table, where_sql
            )
        }
        Operation::Insert { values, returning } => {
            build_insert(command, &mut t, &table, values, *returning)?
        }
        Operation::Update { assignments } => {
            let set = assignment_list(&mut t, assignments, None)?;
            let where_sql = where_clause(command, &mut t)?;
            format!("UPDATE {} SET {}{}", table, set, where_sql)
        }
        Operation::Delete => {
            let where_sql = where_clause(command, &mut t)?;
            format!("DELETE FROM {}{}", table, where_sql)
        }
        Operation::Upsert(spec) => build_upsert(command, &mut t, &table, spec)?,
    };

    let stmt = t.finish(sql);
    check_unique_names(&stmt)?;
    Ok(stmt)
}

fn predicate(command: &Command, t: &mut Translator<'_>) -> Result<Option<String>, BuildError> {
    match command.filter() {
        Some(Filter::Expr(expr)) => Ok(Some(t.predicate(expr)?)),
        Some(Filter::Raw(raw)) => Ok(Some(raw.sql.clone())),
        None => Ok(None),
    }
}

fn where_clause(command: &Command, t: &mut Translator<'_>) -> Result<String, BuildError> {
    Ok(predicate(command, t)?
        .map(|p| format!(" WHERE {}", p))
        .unwrap_or_default())
}

fn build_select(command: &Command, t: &mut Translator<'_>, table: &str) -> Result<String, BuildError> {
    let projection = t.projection(command.columns())?;
    let where_sql = where_clause(command, t)?;
    let mut sql = format!("SELECT {} FROM {}{}", projection, table, where_sql);

    if let Some(order) = command.order_by() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&t.column(&order.field)?);
        if order.descending {
            sql.push_str(" DESC");
        }
    }
    if let Some(paging) = command.paging() {
        sql.push_str(&t.generator().paging(paging.offset, paging.page_size));
    }
    Ok(sql)
}

fn build_find(
    command: &Command,
    t: &mut Translator<'_>,
    table: &str,
    id: &Value,
) -> Result<String, BuildError> {
    let generator = t.generator();
    let projection = t.projection(command.columns())?;
    let identity = t.column(command.identity_field())?;
    let placeholder = t.bind(id.clone());

    let mut condition = format!("{} = {}", identity, placeholder);
    if let Some(extra) = predicate(command, t)? {
        condition = format!("({} AND {})", condition, extra);
    }

    Ok(format!(
        "{}{} FROM {} WHERE {}{}",
        generator.select_single_head(),
        projection,
        table,
        condition,
        generator.select_single_tail()
    ))
}

/// Quoted column names and their placeholders, in payload order.
fn column_values(
    t: &mut Translator<'_>,
    values: &[(String, Value)],
) -> Result<(Vec<String>, Vec<String>), BuildError> {
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (field, value) in values {
        columns.push(t.column(field)?);
        placeholders.push(t.bind(value.clone()));
    }
    Ok((columns, placeholders))
}

/// `[A] = @p0, [B] = @p1`, optionally prefixed with a table alias.
fn assignment_list(
    t: &mut Translator<'_>,
    assignments: &[(String, Value)],
    alias: Option<&str>,
) -> Result<String, BuildError> {
    let mut parts = Vec::with_capacity(assignments.len());
    for (field, value) in assignments {
        let column = t.column(field)?;
        let placeholder = t.bind(value.clone());
        match alias {
            Some(a) => parts.push(format!("{}.{} = {}", a, column, placeholder)),
            None => parts.push(format!("{} = {}", column, placeholder)),
        }
    }
    Ok(parts.join(", "))
}

fn build_insert(
    command: &Command,
    t: &mut Translator<'_>,
    table: &str,
    values: &[(String, Value)],
    returning: ReturnShape,
) -> Result<String, BuildError> {
    let generator = t.generator();
    let (columns, placeholders) = column_values(t, values)?;

    let clause = match returning {
        ReturnShape::None => ReturningClause::default(),
        ReturnShape::Row => {
            let projected = command
                .columns()
                .iter()
                .map(|f| t.column(f))
                .collect::<Result<Vec<_>, _>>()?;
            generator.returning(&projected)
        }
        ReturnShape::Identity => generator.returning(&[t.column(command.identity_field())?]),
    };

    let mut sql = format!("INSERT INTO {} ({})", table, columns.join(", "));
    if let Some(before) = clause.before_values {
        sql.push(' ');
        sql.push_str(&before);
    }
    sql.push_str(&format!(" VALUES ({})", placeholders.join(", ")));
    if let Some(after) = clause.after_values {
        sql.push(' ');
        sql.push_str(&after);
    }
    Ok(sql)
}

fn build_upsert(
    command: &Command,
    t: &mut Translator<'_>,
    table: &str,
    spec: &UpsertSpec,
) -> Result<String, BuildError> {
    let generator = t.generator();
    let key_columns = command
        .upsert_key_fields(spec)
        .into_iter()
        .map(|k| t.column(k))
        .collect::<Result<Vec<_>, _>>()?;
    let (columns, placeholders) = column_values(t, &spec.insert)?;

    match generator.upsert_style() {
        UpsertStyle::Merge => {
            let target = generator.quote_identifier("target");
            let source = generator.quote_identifier("source");
            let on = key_columns
                .iter()
                .map(|c| format!("{}.{} = {}.{}", target, c, source, c))
                .collect::<Vec<_>>()
                .join(" AND ");
            let set = assignment_list(t, &spec.update, Some(&target))?;
            let source_values = columns
                .iter()
                .map(|c| format!("{}.{}", source, c))
                .collect::<Vec<_>>()
                .join(", ");
            let column_list = columns.join(", ");

            Ok(format!(
                "MERGE INTO {} AS {} USING (VALUES ({})) AS {} ({}) ON {} \
                 WHEN MATCHED THEN UPDATE SET {} \
                 WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
                table,
                target,
                placeholders.join(", "),
                source,
                column_list,
                on,
                set,
                column_list,
                source_values
            ))
        }
        UpsertStyle::OnConflict => {
            let set = assignment_list(t, &spec.update, None)?;
            Ok(format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                table,
                columns.join(", "),
                placeholders.join(", "),
                key_columns.join(", "),
                set
            ))
        }
    }
}

fn check_unique_names(stmt: &ParameterizedStatement) -> Result<(), BuildError> {
    let mut seen = HashSet::new();
    for p in &stmt.parameters {
        if !seen.insert(p.name.as_str()) {
            return Err(BuildError::DuplicateParameter(p.name.clone()));
        }
    }
    Ok(())
}
