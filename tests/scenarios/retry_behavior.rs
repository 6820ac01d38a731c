//! Test: Retry Behavior - transient errors are retried without duplicating effects

use crate::helpers::*;
use provision::core::Address;
use provision::deploy::dao::{handles, steps};
use provision::deploy::dao_graph;
use provision::execution::{ExecutionError, TransactionExecutor};
use provision::ledger::{OperationKind, Signer, TransactionGroup, TransactionRequest};
use std::sync::Arc;

/// Test that a transient failure on the first create-app submission is retried
#[tokio::test]
async fn test_create_app_retried_after_transient_error() {
    let config = dao_config();
    let ledger = RecordingLedger::new(funded_ledger(&config))
        .fail_transiently(of_kind(OperationKind::CreateApplication), 1);
    let harness = Harness::new(&config, ledger);

    let report = harness.engine.execute(&dao_graph(&config).unwrap()).await.unwrap();

    assert!(report.is_success());
    assert_completed(&report, steps::CREATE_APP);
    assert_eq!(harness.ledger.submit_count(OperationKind::CreateApplication), 2);
    assert_eq!(harness.ledger.ledger().application_count(), 1);
    assert!(report.get(handles::DAO_APP).is_ok());
}

/// Test that a response lost after commit is recovered by a status lookup
#[tokio::test]
async fn test_lost_response_does_not_duplicate_application() {
    let config = dao_config();
    let ledger = RecordingLedger::new(funded_ledger(&config))
        .drop_after_commit(of_kind(OperationKind::CreateApplication), 1);
    let harness = Harness::new(&config, ledger);

    let report = harness.engine.execute(&dao_graph(&config).unwrap()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(harness.ledger.submit_count(OperationKind::CreateApplication), 1);
    assert_eq!(harness.ledger.ledger().application_count(), 1);
}

/// Test that a rejection is returned at once and never retried
#[tokio::test]
async fn test_rejection_is_not_retried() {
    let config = dao_config();
    let ledger = Arc::new(
        RecordingLedger::new(funded_ledger(&config)).reject(of_kind(OperationKind::Payment), "bad signature"),
    );
    let executor = TransactionExecutor::new(ledger.clone(), ledger.clone()).with_retry_policy(fast_retry(5));

    let group = TransactionGroup::single(TransactionRequest::payment(
        Signer::Key(config.accounts.funding.address.clone()),
        Address::new("SINK"),
        1_000,
    ));
    let result = executor.submit(&group).await;

    assert_eq!(
        result,
        Err(ExecutionError::LedgerRejection {
            reason: "bad signature".to_string()
        })
    );
    assert_eq!(ledger.submissions().len(), 1);
}

/// Test that the executor gives up after the configured number of attempts
#[tokio::test]
async fn test_transient_errors_exhaust_attempts() {
    let config = dao_config();
    let ledger = Arc::new(
        RecordingLedger::new(funded_ledger(&config)).fail_transiently(of_kind(OperationKind::Payment), usize::MAX),
    );
    let executor = TransactionExecutor::new(ledger.clone(), ledger.clone()).with_retry_policy(fast_retry(4));

    let group = TransactionGroup::single(TransactionRequest::payment(
        Signer::Key(config.accounts.funding.address.clone()),
        Address::new("SINK"),
        1_000,
    ));
    let result = executor.submit(&group).await;

    assert!(matches!(
        result,
        Err(ExecutionError::TransientNetworkError { attempts: 4, .. })
    ));
    assert_eq!(ledger.submissions().len(), 4);
    assert_eq!(ledger.ledger().balance(&Address::new("SINK")), 0);
}

/// Test that a dropped connection while compiling a logic signature is retried
#[tokio::test]
async fn test_logic_compile_retried_after_transient_error() {
    let config = dao_config();
    let ledger = RecordingLedger::new(funded_ledger(&config)).fail_compile(1);
    let harness = Harness::new(&config, ledger);

    let report = harness.engine.execute(&dao_graph(&config).unwrap()).await.unwrap();

    assert!(report.is_success(), "first failure: {:?}", report.first_failure);
    assert_completed(&report, steps::FUND_DAO_FUND_LSIG);
    assert_completed(&report, steps::FUND_PROPOSAL_LSIG);
    assert!(report.get(handles::DAO_FUND_LSIG).is_ok());
    assert!(report.get(handles::PROPOSAL_LSIG).is_ok());
    assert_eq!(harness.ledger.submit_count(OperationKind::FundContract), 2);
}
