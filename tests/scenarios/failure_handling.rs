//! Test: Failure Handling - a failed step stops its dependants and nothing else

use crate::helpers::*;
use provision::core::{HandleValue, RegistryError, Step, StepContext, StepError, StepOutput};
use provision::deploy::dao::{handles, steps};
use provision::deploy::dao_graph;
use provision::execution::ExecutionError;
use provision::ledger::OperationKind;
use provision::persistence::CheckpointStore;

/// Test that a rejected app funding blocks only the steps that need it
#[tokio::test]
async fn test_fund_app_rejection_blocks_dependants_only() {
    let config = dao_config();
    let ledger = RecordingLedger::new(funded_ledger(&config))
        .reject(single_payment(), "overspend: insufficient funds");
    let harness = Harness::new(&config, ledger);

    let report = harness.engine.execute(&dao_graph(&config).unwrap()).await.unwrap();

    assert!(!report.is_success());
    assert_failed(&report, steps::FUND_APP);
    assert_not_attempted(&report, steps::OPT_IN_APP_TO_TOKEN, steps::FUND_APP);
    assert_not_attempted(&report, steps::DISTRIBUTE_TOKEN, steps::FUND_APP);
    assert_eq!(
        report.not_attempted,
        vec![
            steps::OPT_IN_APP_TO_TOKEN.to_string(),
            steps::DISTRIBUTE_TOKEN.to_string()
        ]
    );

    let failure = report.first_failure.as_ref().unwrap();
    assert_eq!(failure.step, steps::FUND_APP);
    assert!(failure.error.is_ledger_rejection());

    // Independent branches still ran
    assert_completed(&report, steps::FUND_DAO_FUND_LSIG);
    assert_completed(&report, steps::FUND_PROPOSAL_LSIG);
    assert_completed(&report, steps::OPT_IN_DAO_FUND_LSIG_TO_TOKEN);
    assert_completed(&report, steps::OPT_IN_VOTER_B_TO_TOKEN);
    assert!(matches!(report.get(handles::DAO_FUND_LSIG), Ok(HandleValue::Contract(_))));
    assert!(matches!(report.get(handles::PROPOSAL_LSIG), Ok(HandleValue::Contract(_))));

    assert!(!harness.store.has_completed(steps::FUND_APP).await.unwrap());
    assert!(harness.store.has_completed(steps::FUND_PROPOSAL_LSIG).await.unwrap());
    assert_eq!(harness.ledger.submit_count(OperationKind::AssetTransfer), 0);
}

/// Test that exhausting the retry budget fails the step and everything downstream
#[tokio::test]
async fn test_retry_budget_exhausted() {
    let config = dao_config();
    let ledger = RecordingLedger::new(funded_ledger(&config))
        .fail_transiently(of_kind(OperationKind::CreateAsset), usize::MAX);
    let harness = Harness::new(&config, ledger);
    let pipeline = dao_graph(&config).unwrap();

    let report = harness.engine.execute(&pipeline).await.unwrap();

    assert_completed(&report, steps::FUND_ACCOUNTS);
    assert_failed(&report, steps::CREATE_TOKEN);
    assert_eq!(report.not_attempted.len(), pipeline.len() - 2);
    assert!(matches!(
        report.first_failure.as_ref().map(|f| &f.error),
        Some(StepError::Execution(ExecutionError::TransientNetworkError { attempts: 3, .. }))
    ));
    assert_eq!(
        harness.ledger.submit_count(OperationKind::CreateAsset),
        config.retry.max_attempts as usize
    );
    assert_eq!(harness.ledger.ledger().asset_count(), 0);
}

/// Test that asking the report for an unknown handle is an error
#[tokio::test]
async fn test_unknown_handle_is_unbound() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));

    let report = harness.engine.execute(&dao_graph(&config).unwrap()).await.unwrap();

    assert_eq!(
        report.get("nonexistent-handle"),
        Err(RegistryError::UnboundHandle("nonexistent-handle".to_string()))
    );
}

/// Test that a step reading a handle it did not declare fails
#[tokio::test]
async fn test_undeclared_read_fails_step() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));

    let steps = vec![
        Step::new("mint")
            .produces(["token"])
            .with_fn(|_ctx: StepContext| async { Ok(StepOutput::new().with_handle("token", HandleValue::Asset(5))) }),
        Step::new("peek")
            .depends_on(["mint"])
            .with_fn(|ctx: StepContext| async move {
                ctx.handles().get("token")?;
                Ok(StepOutput::new())
            }),
    ];

    let report = harness.engine.run("peeking", steps).await.unwrap();

    assert_failed(&report, "peek");
    assert!(matches!(
        report.first_failure.as_ref().map(|f| &f.error),
        Some(StepError::Registry(RegistryError::UndeclaredRead { .. }))
    ));
}
