mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{registry_with, Counters, ScriptedDriver};
use pretty_assertions::assert_eq;
use sqlroute::prelude::*;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn manager_for(driver: &ScriptedDriver) -> (TransactionManager, Arc<ConnectionRegistry>) {
    let registry = registry_with("primary", driver, ConnectionSettings::default());
    (TransactionManager::new(Arc::clone(&registry)), registry)
}

fn insert_order() -> Command {
    Command::insert("primary", "Orders", [("id", 1)]).build()
}

#[tokio::test]
async fn test_run_commits_on_success() {
    let driver = ScriptedDriver::new();
    let (manager, registry) = manager_for(&driver);
    let cmd = insert_order();

    let affected = manager
        .run("primary", IsolationLevel::ReadCommitted, TIMEOUT, |tx| {
            Box::pin(async move {
                match tx.execute(&cmd).await? {
                    CommandOutcome::Affected(n) => Ok(n),
                    other => Err(ExecutionError::Mapping(format!("{:?}", other))),
                }
            })
        })
        .await
        .unwrap();

    assert_eq!(affected, 1);
    let c = driver.counters();
    assert_eq!(Counters::get(&c.begins), 1);
    assert_eq!(Counters::get(&c.commits), 1);
    assert_eq!(Counters::get(&c.rollbacks), 0);
    assert!(!registry.resolve("primary").unwrap().is_transaction_bound());
}

#[tokio::test]
async fn test_run_rolls_back_exactly_once_on_error() {
    let driver = ScriptedDriver::new();
    let (manager, registry) = manager_for(&driver);
    let cmd = insert_order();

    let err = manager
        .run("primary", IsolationLevel::Serializable, TIMEOUT, |tx| {
            Box::pin(async move {
                tx.execute(&cmd).await?;
                Err::<(), _>(ExecutionError::Validation("business rule rejected order".into()))
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    let c = driver.counters();
    assert_eq!(Counters::get(&c.rollbacks), 1);
    assert_eq!(Counters::get(&c.commits), 0);
    assert!(!registry.resolve("primary").unwrap().is_transaction_bound());
}

#[tokio::test]
async fn test_statement_failure_inside_scope_rolls_back() {
    let driver = ScriptedDriver::new();
    driver.fail(FaultKind::Constraint, "duplicate key");
    let (manager, _registry) = manager_for(&driver);
    let cmd = insert_order();

    let err = manager
        .run("primary", IsolationLevel::ReadCommitted, TIMEOUT, |tx| {
            Box::pin(async move { tx.execute(&cmd).await.map(|_| ()) })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NonTransientExecution);
    assert_eq!(Counters::get(&driver.counters().rollbacks), 1);
    // statements inside a transaction are never retried
    assert_eq!(Counters::get(&driver.counters().executes), 1);
}

#[tokio::test]
async fn test_nested_begin_fails_explicitly() {
    let driver = ScriptedDriver::new();
    let (manager, _registry) = manager_for(&driver);

    let mut outer = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap();
    let err = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Transaction(TransactionError::NestedNotSupported(ref name)) if name == "primary"
    ));
    assert_eq!(err.kind(), ErrorKind::TransactionState);
    assert_eq!(outer.state(), TransactionState::Active);

    outer.rollback().await.unwrap();
    assert!(manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_finished_transaction_rejects_further_work() {
    let driver = ScriptedDriver::new();
    let (manager, _registry) = manager_for(&driver);

    let mut tx = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);

    let err = tx.commit().await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Transaction(TransactionError::InvalidState {
            state: TransactionState::Committed
        })
    ));
    assert!(tx.rollback().await.is_err());
    assert!(tx.execute(&insert_order()).await.is_err());
    assert_eq!(Counters::get(&driver.counters().commits), 1);
    assert_eq!(Counters::get(&driver.counters().rollbacks), 0);
}

#[tokio::test]
async fn test_dispose_rolls_back_once_and_is_idempotent() {
    let driver = ScriptedDriver::new();
    let (manager, _registry) = manager_for(&driver);

    let mut tx = manager
        .begin("primary", IsolationLevel::RepeatableRead, TIMEOUT)
        .await
        .unwrap();
    tx.dispose().await;
    tx.dispose().await;

    assert_eq!(tx.state(), TransactionState::Disposed);
    assert_eq!(Counters::get(&driver.counters().rollbacks), 1);
}

#[tokio::test]
async fn test_drop_while_active_rolls_back_in_background() {
    let driver = ScriptedDriver::new();
    let (manager, registry) = manager_for(&driver);

    let tx = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap();
    drop(tx);

    for _ in 0..10 {
        if Counters::get(&driver.counters().rollbacks) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Counters::get(&driver.counters().rollbacks), 1);
    assert!(!registry.resolve("primary").unwrap().is_transaction_bound());
}

#[tokio::test(start_paused = true)]
async fn test_transaction_deadline_rolls_back() {
    let driver = ScriptedDriver::new();
    driver.set_delay(Duration::from_secs(10));
    let (manager, _registry) = manager_for(&driver);

    let mut tx = manager
        .begin("primary", IsolationLevel::ReadCommitted, Duration::from_millis(200))
        .await
        .unwrap();
    let err = tx.execute(&insert_order()).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Transaction(TransactionError::TimedOut(_))));
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(Counters::get(&driver.counters().rollbacks), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_statement_rolls_back() {
    let driver = ScriptedDriver::new();
    driver.set_delay(Duration::from_secs(10));
    let (manager, registry) = manager_for(&driver);

    let mut tx = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tx
        .execute_with_cancellation(&insert_order(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(Counters::get(&driver.counters().rollbacks), 1);
    assert!(!registry.resolve("primary").unwrap().is_transaction_bound());
    assert!(tx.commit().await.is_err());
}

#[tokio::test]
async fn test_run_with_cancelled_scope_rolls_back_once() {
    let driver = ScriptedDriver::new();
    let (manager, _registry) = manager_for(&driver);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let cmd = insert_order();

    let err = manager
        .run("primary", IsolationLevel::ReadCommitted, TIMEOUT, |tx| {
            Box::pin(async move { tx.execute_with_cancellation(&cmd, &cancel).await.map(|_| ()) })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(Counters::get(&driver.counters().rollbacks), 1);
    assert_eq!(Counters::get(&driver.counters().commits), 0);
}

#[tokio::test]
async fn test_commit_failure_leaves_transaction_rolled_back() {
    let driver = ScriptedDriver::new();
    driver.fail_commit(DriverError::new(FaultKind::Network, "connection reset"));
    let (manager, registry) = manager_for(&driver);

    let mut tx = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap();
    let err = tx.commit().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientExecution);
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert!(!registry.resolve("primary").unwrap().is_transaction_bound());
}

#[tokio::test]
async fn test_command_for_other_connection_is_rejected() {
    let driver = ScriptedDriver::new();
    let (manager, _registry) = manager_for(&driver);

    let mut tx = manager
        .begin("primary", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap();
    let cmd = Command::select("replica", "Orders").build();
    let err = tx.execute(&cmd).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(tx.state(), TransactionState::Active);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_begin_on_unknown_connection() {
    let driver = ScriptedDriver::new();
    let (manager, _registry) = manager_for(&driver);

    let err = manager
        .begin("missing", IsolationLevel::ReadCommitted, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionNotFound);
    assert_eq!(Counters::get(&driver.counters().begins), 0);
}
