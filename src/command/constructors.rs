//! Constructor functions for commands.
//!
//! ```
//! use sqlroute::ast::*;
//! use sqlroute::command::Command;
//!
//! let cmd = Command::select("primary", "Customers")
//!     .filter(and(eq("isActive", true), gt("creditLimit", 5000)))
//!     .order_by("name")
//!     .page(20, 10)
//!     .build();
//! assert_eq!(cmd.paging().unwrap().offset, 20);
//! ```

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::ast::{Expr, Value};
use crate::command::{
    collect_fields, Command, Filter, Operation, OrderBy, Paging, ReturnShape, UpsertSpec,
};
use crate::transpiler::{FieldResolver, ParameterizedStatement};

/// Accumulates optional clauses for one command. `build` hands back the
/// immutable [`Command`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: Command,
}

impl Command {
    fn builder(connection: impl Into<String>, container: impl Into<String>, op: Operation) -> CommandBuilder {
        CommandBuilder {
            command: Command::new(connection, container, op),
        }
    }

    /// Filtered query returning rows.
    pub fn select(connection: impl Into<String>, container: impl Into<String>) -> CommandBuilder {
        Self::builder(connection, container, Operation::Select)
    }

    /// Point lookup on the identity field.
    pub fn find(
        connection: impl Into<String>,
        container: impl Into<String>,
        id: impl Into<Value>,
    ) -> CommandBuilder {
        Self::builder(connection, container, Operation::Find { id: id.into() })
    }

    pub fn count(connection: impl Into<String>, container: impl Into<String>) -> CommandBuilder {
        Self::builder(connection, container, Operation::Count)
    }

    pub fn exists(connection: impl Into<String>, container: impl Into<String>) -> CommandBuilder {
        Self::builder(connection, container, Operation::Exists)
    }

    pub fn insert<K, V>(
        connection: impl Into<String>,
        container: impl Into<String>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> CommandBuilder
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::insert_returning(connection, container, values, ReturnShape::None)
    }

    /// Insert that returns the new row or its identity.
    pub fn insert_returning<K, V>(
        connection: impl Into<String>,
        container: impl Into<String>,
        values: impl IntoIterator<Item = (K, V)>,
        returning: ReturnShape,
    ) -> CommandBuilder
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let op = Operation::Insert {
            values: collect_fields(values),
            returning,
        };
        Self::builder(connection, container, op)
    }

    pub fn update<K, V>(
        connection: impl Into<String>,
        container: impl Into<String>,
        assignments: impl IntoIterator<Item = (K, V)>,
    ) -> CommandBuilder
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let op = Operation::Update {
            assignments: collect_fields(assignments),
        };
        Self::builder(connection, container, op)
    }

    pub fn delete(connection: impl Into<String>, container: impl Into<String>) -> CommandBuilder {
        Self::builder(connection, container, Operation::Delete)
    }

    pub fn upsert(
        connection: impl Into<String>,
        container: impl Into<String>,
        spec: UpsertSpec,
    ) -> CommandBuilder {
        Self::builder(connection, container, Operation::Upsert(spec))
    }
}

impl CommandBuilder {
    /// WHERE clause from an expression tree.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.command.filter = Some(Filter::Expr(expr));
        self
    }

    /// WHERE clause from a hand-built fragment.
    pub fn filter_raw(mut self, stmt: ParameterizedStatement) -> Self {
        self.command.filter = Some(Filter::Raw(stmt));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.command.order_by = Some(OrderBy {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.command.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn page(mut self, offset: u64, page_size: u64) -> Self {
        self.command.paging = Some(Paging { offset, page_size });
        self
    }

    /// Projection. Empty means every column.
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.command.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Logical schema, remapped per connection.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.command.schema = Some(schema.into());
        self
    }

    pub fn identity_field(mut self, field: impl Into<String>) -> Self {
        self.command.identity_field = field.into();
        self
    }

    pub fn resolver(mut self, resolver: impl FieldResolver + 'static) -> Self {
        self.command.resolver = Arc::new(resolver);
        self
    }

    pub fn shared_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.command.resolver = resolver;
        self
    }

    /// Allow retries of a mutation.
    pub fn idempotent(mut self) -> Self {
        self.command.idempotent = true;
        self
    }

    /// Override the connection's command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    /// Tie this command to a wider operation. Defaults to the command id.
    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.command.correlation_id = id;
        self
    }

    pub fn build(self) -> Command {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::command::CommandKind;
    use crate::transpiler::EntitySchema;

    #[test]
    fn test_ids_are_fresh_and_correlation_defaults_to_command() {
        let a = Command::select("primary", "Orders").build();
        let b = Command::select("primary", "Orders").build();
        assert_ne!(a.command_id(), b.command_id());
        assert_eq!(a.correlation_id(), a.command_id());

        let corr = Uuid::new_v4();
        let c = Command::count("primary", "Orders").correlation_id(corr).build();
        assert_eq!(c.correlation_id(), corr);
    }

    #[test]
    fn test_insert_payload_keeps_order() {
        let cmd = Command::insert(
            "primary",
            "Customers",
            [("name", Value::from("Ann")), ("creditLimit", Value::from(100))],
        )
        .build();
        assert_eq!(cmd.kind(), CommandKind::Insert);
        match cmd.operation() {
            Operation::Insert { values, returning } => {
                assert_eq!(values[0].0, "name");
                assert_eq!(values[1].1, Value::Int(100));
                assert_eq!(*returning, ReturnShape::None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolver_and_options() {
        let schema = EntitySchema::new("Customer").field("name", "full_name");
        let cmd = Command::select("primary", "Customers")
            .filter(eq("name", "x"))
            .resolver(schema)
            .order_by_desc("name")
            .timeout(Duration::from_secs(3))
            .schema("sales")
            .build();
        assert_eq!(cmd.resolver().resolve("name").unwrap(), "full_name");
        assert!(cmd.order_by().unwrap().descending);
        assert_eq!(cmd.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(cmd.schema(), Some("sales"));
    }
}
