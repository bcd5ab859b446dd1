//! Transaction manager.
//!
//! A [`Transaction`] pins one connection for its lifetime. It moves
//! `Active -> (Committed | RolledBack) -> Disposed`. Dropping an Active
//! transaction rolls it back in the background.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::command::{build_statement, Command};
use crate::driver::{DriverError, DriverTransaction, IsolationLevel};
use crate::engine::{dispatch, shape, timed_out, CommandOutcome, Target};
use crate::error::{ExecutionError, ExecutionResult, TransactionError};
use crate::registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    Disposed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Active => "Active",
            TransactionState::Committed => "Committed",
            TransactionState::RolledBack => "RolledBack",
            TransactionState::Disposed => "Disposed",
        };
        f.write_str(s)
    }
}

/// Begins transactions on registered connections.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    registry: Arc<ConnectionRegistry>,
}

impl TransactionManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Begin a transaction bound to `connection`. Fails with
    /// `NestedNotSupported` if one is already active there.
    pub async fn begin(
        &self,
        connection: &str,
        isolation: IsolationLevel,
        timeout: Duration,
    ) -> ExecutionResult<Transaction> {
        if timeout.is_zero() {
            return Err(ExecutionError::validation("transaction timeout must be non-zero"));
        }
        let handle = self
            .registry
            .resolve(connection)
            .ok_or_else(|| ExecutionError::ConnectionNotFound(connection.to_string()))?;

        if !handle.try_bind_transaction() {
            return Err(TransactionError::NestedNotSupported(connection.to_string()).into());
        }

        let unavailable = |message: String| ExecutionError::ConnectionUnavailable {
            connection: connection.to_string(),
            message,
        };
        match handle.probe().await {
            Ok(true) => {}
            Ok(false) => {
                handle.release_transaction();
                return Err(unavailable(format!("connection is {:?}", handle.state())));
            }
            Err(e) => {
                handle.release_transaction();
                return Err(unavailable(e.to_string()));
            }
        }

        let inner = match tokio::time::timeout(timeout, handle.driver().begin(isolation)).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(e)) => {
                handle.release_transaction();
                handle.note_failure(&e);
                return Err(lifecycle_failure("Begin", connection, e));
            }
            Err(_) => {
                handle.release_transaction();
                return Err(TransactionError::TimedOut(timeout).into());
            }
        };

        let tx = Transaction {
            id: Uuid::new_v4(),
            connection: connection.to_string(),
            handle,
            inner: Some(inner),
            state: TransactionState::Active,
            bound: true,
            isolation,
            timeout,
            deadline: Instant::now() + timeout,
        };
        tracing::debug!("Transaction {} began on '{}' ({})", tx.id, connection, isolation);
        Ok(tx)
    }

    /// Run `scope` inside a transaction. Commits on `Ok` unless the scope
    /// already finished the transaction; rolls back once on `Err`.
    pub async fn run<T, F>(
        &self,
        connection: &str,
        isolation: IsolationLevel,
        timeout: Duration,
        scope: F,
    ) -> ExecutionResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, ExecutionResult<T>>,
    {
        let mut tx = self.begin(connection, isolation, timeout).await?;
        let result = scope(&mut tx).await;

        let outcome = match result {
            Ok(value) => {
                if tx.state() == TransactionState::Active {
                    tx.commit().await?;
                }
                Ok(value)
            }
            Err(e) => {
                if tx.state() == TransactionState::Active {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!("Transaction {} rollback after failure also failed: {}", tx.id, rollback_err);
                    }
                }
                Err(e)
            }
        };
        tx.dispose().await;
        outcome
    }
}

/// An open transaction on one connection.
pub struct Transaction {
    id: Uuid,
    connection: String,
    handle: Arc<ConnectionHandle>,
    inner: Option<Box<dyn DriverTransaction>>,
    state: TransactionState,
    /// Still holds the connection's transaction binding.
    bound: bool,
    isolation: IsolationLevel,
    timeout: Duration,
    deadline: Instant,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("isolation", &self.isolation)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Transaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the transaction deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run one command inside the transaction. Never retried.
    ///
    /// The statement is bounded by the shorter of the command timeout and
    /// the time left on the transaction. Hitting the transaction deadline
    /// rolls back and fails with `TimedOut`.
    pub async fn execute(&mut self, command: &Command) -> ExecutionResult<CommandOutcome> {
        self.execute_with_cancellation(command, &CancellationToken::new()).await
    }

    /// [`execute`](Self::execute) raced against `cancel`. A cancelled
    /// statement rolls the transaction back.
    pub async fn execute_with_cancellation(
        &mut self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> ExecutionResult<CommandOutcome> {
        self.ensure_active()?;
        command.validate()?;
        if command.connection_name() != self.connection {
            return Err(ExecutionError::validation(format!(
                "command targets '{}' but the transaction is bound to '{}'",
                command.connection_name(),
                self.connection
            )));
        }

        let handle = Arc::clone(&self.handle);
        let stmt = build_statement(command, handle.dialect(), &handle.settings().schemas)?;

        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(self.expire().await);
        }
        let command_limit = command.timeout().unwrap_or(handle.settings().command_timeout);
        let limit = command_limit.min(remaining);

        let inner = self.inner.as_mut().ok_or(TransactionError::InvalidState { state: self.state })?;
        let _in_flight = handle.begin_execution();
        let result = {
            let mut target = Target::Transaction(&mut **inner);
            let run = tokio::time::timeout(limit, dispatch(&mut target, command, &stmt));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                out = run => Some(out),
            }
        };
        let Some(result) = result else {
            tracing::warn!("Transaction {} cancelled mid-statement; rolling back", self.id);
            self.abandon().await;
            return Err(ExecutionError::Cancelled {
                command: command.kind().to_string(),
                connection: self.connection.clone(),
            });
        };

        match result {
            Ok(Ok(raw)) => shape(command, raw),
            Ok(Err(e)) => {
                handle.note_failure(&e);
                Err(crate::engine::execution_failure(command, e))
            }
            Err(_) if limit < command_limit => Err(self.expire().await),
            Err(_) => Err(timed_out(command, limit)),
        }
    }

    pub async fn commit(&mut self) -> ExecutionResult<()> {
        self.ensure_active()?;
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(self.expire().await);
        }
        let inner = self.inner.take().ok_or(TransactionError::InvalidState { state: self.state })?;

        let result = tokio::time::timeout(remaining, inner.commit()).await;
        self.unbind();
        match result {
            Ok(Ok(())) => {
                self.state = TransactionState::Committed;
                tracing::debug!("Transaction {} committed", self.id);
                Ok(())
            }
            Ok(Err(e)) => {
                // The driver discards a transaction whose commit failed.
                self.state = TransactionState::RolledBack;
                self.handle.note_failure(&e);
                Err(lifecycle_failure("Commit", &self.connection, e))
            }
            Err(_) => {
                self.state = TransactionState::RolledBack;
                tracing::warn!("Transaction {} timed out while committing", self.id);
                Err(TransactionError::TimedOut(self.timeout).into())
            }
        }
    }

    pub async fn rollback(&mut self) -> ExecutionResult<()> {
        self.ensure_active()?;
        let inner = self.inner.take().ok_or(TransactionError::InvalidState { state: self.state })?;
        let result = inner.rollback().await;
        self.unbind();
        self.state = TransactionState::RolledBack;
        match result {
            Ok(()) => {
                tracing::debug!("Transaction {} rolled back", self.id);
                Ok(())
            }
            Err(e) => {
                self.handle.note_failure(&e);
                Err(lifecycle_failure("Rollback", &self.connection, e))
            }
        }
    }

    /// Roll back if still Active, then mark Disposed. Safe to call repeatedly.
    pub async fn dispose(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.rollback().await {
                tracing::warn!("Transaction {} rollback on dispose failed: {}", self.id, e);
            }
        }
        self.unbind();
        self.state = TransactionState::Disposed;
    }

    fn ensure_active(&self) -> Result<(), TransactionError> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(TransactionError::InvalidState { state: self.state })
        }
    }

    /// Deadline passed: roll back and report the timeout.
    async fn expire(&mut self) -> ExecutionError {
        tracing::warn!("Transaction {} exceeded its {:?} timeout; rolling back", self.id, self.timeout);
        self.abandon().await;
        TransactionError::TimedOut(self.timeout).into()
    }

    async fn abandon(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(e) = inner.rollback().await {
                tracing::warn!("Transaction {} rollback failed: {}", self.id, e);
            }
        }
        self.unbind();
        self.state = TransactionState::RolledBack;
    }

    fn unbind(&mut self) {
        if self.bound {
            self.bound = false;
            self.handle.release_transaction();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            self.unbind();
            return;
        };
        tracing::warn!("Transaction {} dropped while Active; rolling back", self.id);
        self.state = TransactionState::RolledBack;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                // Release the binding only once the rollback has finished.
                let handle = Arc::clone(&self.handle);
                let id = self.id;
                let bound = std::mem::replace(&mut self.bound, false);
                runtime.spawn(async move {
                    if let Err(e) = inner.rollback().await {
                        tracing::warn!("Background rollback of transaction {} failed: {}", id, e);
                    }
                    if bound {
                        handle.release_transaction();
                    }
                });
            }
            Err(_) => {
                // No runtime: dropping the driver transaction discards it.
                drop(inner);
                self.unbind();
            }
        }
    }
}

fn lifecycle_failure(step: &str, connection: &str, err: DriverError) -> ExecutionError {
    if err.is_transient() {
        ExecutionError::Transient {
            command: step.to_string(),
            connection: connection.to_string(),
            fault: err.kind,
            message: err.message,
        }
    } else {
        ExecutionError::NonTransient {
            command: step.to_string(),
            connection: connection.to_string(),
            fault: err.kind,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(TransactionState::RolledBack.to_string(), "RolledBack");
        let err = TransactionError::InvalidState {
            state: TransactionState::Committed,
        };
        assert_eq!(err.to_string(), "Transaction is Committed, expected Active");
    }

    #[test]
    fn test_lifecycle_failure_classification() {
        let err = lifecycle_failure(
            "Commit",
            "primary",
            DriverError::new(crate::driver::FaultKind::Network, "connection reset"),
        );
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Commit on 'primary' failed (network): connection reset");
    }
}
