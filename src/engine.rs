//! Command execution engine.
//!
//! Each command moves through `Validated -> ConnectionResolved ->
//! AvailabilityChecked -> Executing -> {Succeeded | Failed}`, wrapped by the
//! retry layer. Rows come back as JSON maps and the typed helpers
//! deserialize them through serde.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::command::{build_statement, Command, Operation, ReturnShape};
use crate::config::EngineConfig;
use crate::driver::{Driver, DriverError, DriverTransaction, Row, SqlxDriver};
use crate::error::{ConfigError, ExecutionError, ExecutionResult};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::resilience::{Resilience, RetryPolicy, RetryScope};
use crate::transaction::TransactionManager;
use crate::transpiler::ParameterizedStatement;

/// Untyped result of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Select
    Rows(Vec<Row>),
    /// Find, or an insert that returns its row or identity
    Row(Option<Row>),
    Count(i64),
    Exists(bool),
    /// Affected rows of a mutation
    Affected(u64),
}

impl CommandOutcome {
    fn shape_name(&self) -> &'static str {
        match self {
            CommandOutcome::Rows(_) => "rows",
            CommandOutcome::Row(_) => "row",
            CommandOutcome::Count(_) => "count",
            CommandOutcome::Exists(_) => "exists",
            CommandOutcome::Affected(_) => "affected",
        }
    }
}

/// One page of a paged query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub offset: u64,
    pub page_size: u64,
}

impl<T> PagedResult<T> {
    pub fn has_next_page(&self) -> bool {
        self.offset.saturating_add(self.items.len() as u64) < self.total_count
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total_count.div_ceil(self.page_size)
        }
    }
}

/// Routes commands to named connections.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    registry: Arc<ConnectionRegistry>,
    resilience: Resilience,
}

impl CommandEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            resilience: Resilience::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.resilience = Resilience::new(policy);
        self
    }

    /// Build a registry with one lazily-connected sqlx pool per configured
    /// connection.
    pub fn connect(config: &EngineConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(ConnectionRegistry::new());
        for conn in &config.connections {
            let url = conn.connection_string()?;
            let driver = SqlxDriver::connect_lazy(&url, conn.max_pool_size, conn.command_timeout())
                .map_err(|source| ConfigError::Driver {
                    name: conn.name.clone(),
                    source,
                })?;
            let handle = ConnectionHandle::new(&url, Arc::new(driver), conn.settings());
            if !registry.register(conn.name.clone(), handle) {
                return Err(ConfigError::Duplicate(conn.name.clone()));
            }
        }
        Ok(Self::new(registry).with_retry_policy(config.retry.into()))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.resilience.policy()
    }

    /// Transaction manager over the same registry.
    pub fn transactions(&self) -> TransactionManager {
        TransactionManager::new(Arc::clone(&self.registry))
    }

    pub async fn execute(&self, command: &Command) -> ExecutionResult<CommandOutcome> {
        self.execute_with_cancellation(command, &CancellationToken::new())
            .await
    }

    /// Execute, racing every suspension point against `cancel`.
    pub async fn execute_with_cancellation(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> ExecutionResult<CommandOutcome> {
        let span = tracing::info_span!(
            "command",
            command_id = %command.command_id(),
            correlation_id = %command.correlation_id(),
            connection = %command.connection_name(),
            kind = %command.kind(),
        );

        async {
            if let Err(e) = command.validate() {
                tracing::debug!("Command rejected: {}", e);
                return Err(e);
            }
            tracing::debug!("{} on '{}' validated", command.operation().name(), command.container());

            let auto_retry = self
                .registry
                .resolve(command.connection_name())
                .map(|handle| handle.settings().enable_auto_retry)
                .unwrap_or(true);
            let scope = RetryScope {
                command: command.kind().as_str(),
                connection: command.connection_name(),
                retries_allowed: auto_retry && command.is_retryable(),
                cancel,
            };

            let result = self
                .resilience
                .run(&scope, |attempt| self.attempt(command, cancel, attempt))
                .await;
            match &result {
                Ok(outcome) => tracing::debug!("Command succeeded ({})", outcome.shape_name()),
                Err(e) => tracing::debug!("Command failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        command: &Command,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> ExecutionResult<CommandOutcome> {
        let name = command.connection_name();
        let handle = self
            .registry
            .resolve(name)
            .ok_or_else(|| ExecutionError::ConnectionNotFound(name.to_string()))?;
        tracing::debug!(attempt, "Connection resolved ({})", handle.provider_name());

        if handle.is_transaction_bound() {
            return Err(ExecutionError::ConnectionBusy(name.to_string()));
        }

        let settings = handle.settings();
        let stmt = build_statement(command, handle.dialect(), &settings.schemas)?;

        match cancellable(cancel, command, handle.probe()).await? {
            Ok(true) => {}
            Ok(false) => {
                return Err(ExecutionError::ConnectionUnavailable {
                    connection: name.to_string(),
                    message: format!("connection is {:?}", handle.state()),
                });
            }
            Err(e) => {
                return Err(ExecutionError::ConnectionUnavailable {
                    connection: name.to_string(),
                    message: e.to_string(),
                });
            }
        }
        tracing::debug!("Availability checked; executing {} parameter(s)", stmt.parameter_count());

        let limit = command.timeout().unwrap_or(settings.command_timeout);
        let _in_flight = handle.begin_execution();
        let mut target = Target::Pool(&**handle.driver());
        let run = tokio::time::timeout(limit, dispatch(&mut target, command, &stmt));

        match cancellable(cancel, command, run).await? {
            Ok(Ok(raw)) => shape(command, raw),
            Ok(Err(e)) => {
                handle.note_failure(&e);
                Err(execution_failure(command, e))
            }
            Err(_) => Err(timed_out(command, limit)),
        }
    }

    pub async fn fetch_all<T: DeserializeOwned>(&self, command: &Command) -> ExecutionResult<Vec<T>> {
        match self.execute(command).await? {
            CommandOutcome::Rows(rows) => rows.into_iter().map(from_row).collect(),
            CommandOutcome::Row(row) => row.into_iter().map(from_row).collect(),
            other => Err(unexpected("rows", &other)),
        }
    }

    pub async fn fetch_optional<T: DeserializeOwned>(&self, command: &Command) -> ExecutionResult<Option<T>> {
        match self.execute(command).await? {
            CommandOutcome::Row(row) => row.map(from_row).transpose(),
            CommandOutcome::Rows(rows) => rows.into_iter().next().map(from_row).transpose(),
            other => Err(unexpected("row", &other)),
        }
    }

    /// Single row by identity.
    pub async fn find<T: DeserializeOwned>(&self, command: &Command) -> ExecutionResult<Option<T>> {
        if !matches!(command.operation(), Operation::Find { .. }) {
            return Err(ExecutionError::validation(format!(
                "find expects a Find command, got {}",
                command.operation().name()
            )));
        }
        self.fetch_optional(command).await
    }

    pub async fn count(&self, command: &Command) -> ExecutionResult<i64> {
        match self.execute(command).await? {
            CommandOutcome::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    pub async fn exists(&self, command: &Command) -> ExecutionResult<bool> {
        match self.execute(command).await? {
            CommandOutcome::Exists(found) => Ok(found),
            other => Err(unexpected("exists", &other)),
        }
    }

    /// Affected-row count of an insert, update, delete or upsert.
    pub async fn execute_mutation(&self, command: &Command) -> ExecutionResult<u64> {
        match self.execute(command).await? {
            CommandOutcome::Affected(n) => Ok(n),
            CommandOutcome::Row(row) => Ok(u64::from(row.is_some())),
            other => Err(unexpected("affected", &other)),
        }
    }

    /// The inserted row, or only its identity value, per the command's
    /// return shape.
    pub async fn insert_returning<T: DeserializeOwned>(&self, command: &Command) -> ExecutionResult<T> {
        let shape = match command.operation() {
            Operation::Insert { returning, .. } if *returning != ReturnShape::None => *returning,
            _ => {
                return Err(ExecutionError::validation(
                    "insert_returning expects an Insert with a Row or Identity return shape",
                ));
            }
        };
        let row = match self.execute(command).await? {
            CommandOutcome::Row(Some(row)) => row,
            CommandOutcome::Row(None) => {
                return Err(ExecutionError::Mapping("insert returned no row".into()));
            }
            other => return Err(unexpected("row", &other)),
        };
        match shape {
            ReturnShape::Identity => {
                let value = row
                    .into_iter()
                    .next()
                    .map(|(_, v)| v)
                    .ok_or_else(|| ExecutionError::Mapping("insert returned no identity column".into()))?;
                serde_json::from_value(value).map_err(|e| ExecutionError::Mapping(e.to_string()))
            }
            _ => from_row(row),
        }
    }

    /// Total count and one page of a paged Select.
    pub async fn fetch_page<T: DeserializeOwned>(&self, command: &Command) -> ExecutionResult<PagedResult<T>> {
        let paging = match (command.operation(), command.paging()) {
            (Operation::Select, Some(paging)) => paging,
            _ => {
                return Err(ExecutionError::validation(
                    "fetch_page expects a Select command with paging",
                ));
            }
        };
        let total = self.count(&command.to_count()).await?;
        let items = self.fetch_all(command).await?;
        Ok(PagedResult {
            items,
            total_count: u64::try_from(total).unwrap_or(0),
            offset: paging.offset,
            page_size: paging.page_size,
        })
    }
}

/// Where a statement runs: the pool, or a bound transaction.
pub(crate) enum Target<'a> {
    Pool(&'a dyn Driver),
    Transaction(&'a mut dyn DriverTransaction),
}

impl Target<'_> {
    async fn fetch(&mut self, stmt: &ParameterizedStatement) -> Result<Vec<Row>, DriverError> {
        match self {
            Target::Pool(driver) => driver.fetch(stmt).await,
            Target::Transaction(tx) => tx.fetch(stmt).await,
        }
    }

    async fn execute(&mut self, stmt: &ParameterizedStatement) -> Result<u64, DriverError> {
        match self {
            Target::Pool(driver) => driver.execute(stmt).await,
            Target::Transaction(tx) => tx.execute(stmt).await,
        }
    }
}

/// Raw driver result before shaping.
pub(crate) enum RawOutcome {
    Rows(Vec<Row>),
    Affected(u64),
}

pub(crate) async fn dispatch(
    target: &mut Target<'_>,
    command: &Command,
    stmt: &ParameterizedStatement,
) -> Result<RawOutcome, DriverError> {
    match command.operation() {
        Operation::Insert {
            returning: ReturnShape::None,
            ..
        }
        | Operation::Update { .. }
        | Operation::Delete
        | Operation::Upsert(_) => target.execute(stmt).await.map(RawOutcome::Affected),
        _ => target.fetch(stmt).await.map(RawOutcome::Rows),
    }
}

pub(crate) fn shape(command: &Command, raw: RawOutcome) -> ExecutionResult<CommandOutcome> {
    let rows = match raw {
        RawOutcome::Affected(n) => return Ok(CommandOutcome::Affected(n)),
        RawOutcome::Rows(rows) => rows,
    };
    match command.operation() {
        Operation::Select => Ok(CommandOutcome::Rows(rows)),
        Operation::Count => scalar(&rows).map(CommandOutcome::Count),
        Operation::Exists => scalar(&rows).map(|n| CommandOutcome::Exists(n != 0)),
        _ => Ok(CommandOutcome::Row(rows.into_iter().next())),
    }
}

/// First column of the first row as an integer.
fn scalar(rows: &[Row]) -> ExecutionResult<i64> {
    let value = rows
        .first()
        .and_then(|row| row.values().next())
        .ok_or_else(|| ExecutionError::Mapping("expected a single scalar column".into()))?;
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ExecutionError::Mapping(format!("scalar {} is not an integer", n))),
        serde_json::Value::Bool(b) => Ok(i64::from(*b)),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ExecutionError::Mapping(format!("scalar '{}' is not an integer", s))),
        other => Err(ExecutionError::Mapping(format!("unexpected scalar {}", other))),
    }
}

pub(crate) fn execution_failure(command: &Command, err: DriverError) -> ExecutionError {
    let command_name = command.kind().to_string();
    let connection = command.connection_name().to_string();
    if err.is_transient() {
        ExecutionError::Transient {
            command: command_name,
            connection,
            fault: err.kind,
            message: err.message,
        }
    } else {
        ExecutionError::NonTransient {
            command: command_name,
            connection,
            fault: err.kind,
            message: err.message,
        }
    }
}

pub(crate) fn timed_out(command: &Command, limit: Duration) -> ExecutionError {
    ExecutionError::Transient {
        command: command.kind().to_string(),
        connection: command.connection_name().to_string(),
        fault: crate::driver::FaultKind::Timeout,
        message: format!("command timed out after {:?}", limit),
    }
}

/// Race `fut` against the token.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    command: &Command,
    fut: F,
) -> ExecutionResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecutionError::Cancelled {
            command: command.kind().to_string(),
            connection: command.connection_name().to_string(),
        }),
        out = fut => Ok(out),
    }
}

fn from_row<T: DeserializeOwned>(row: Row) -> ExecutionResult<T> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| ExecutionError::Mapping(e.to_string()))
}

fn unexpected(expected: &str, got: &CommandOutcome) -> ExecutionError {
    ExecutionError::Mapping(format!("expected {} result, got {}", expected, got.shape_name()))
}
