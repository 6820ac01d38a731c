//! Test: DAO Deployment - the full pipeline against a fresh ledger

use crate::helpers::*;
use provision::core::config::DeploymentConfig;
use provision::core::{HandleValue, StepStatus};
use provision::deploy::dao::{handles, steps};
use provision::deploy::dao_graph;
use provision::ledger::LedgerClient;
use provision::persistence::CheckpointStore;

/// Test that a fresh deployment funds, creates and distributes everything
#[tokio::test]
async fn test_full_deployment() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));
    let pipeline = dao_graph(&config).unwrap();

    let report = harness.engine.execute(&pipeline).await.unwrap();

    assert!(report.is_success(), "first failure: {:?}", report.first_failure);
    assert!(report.not_attempted.is_empty());
    assert_eq!(report.state.succeeded_steps, pipeline.len());
    for step in &report.steps {
        assert!(matches!(step.status, StepStatus::Completed { .. }), "{}: {:?}", step.name, step.status);
    }
    assert_eq!(report.handles.len(), 8);

    let ledger = harness.ledger.ledger();
    let token = report.get(handles::GOV_TOKEN).unwrap().as_asset().unwrap();
    let app = report.get(handles::DAO_APP).unwrap().as_application().unwrap();

    for account in [&config.accounts.proposer, &config.accounts.voter_a, &config.accounts.voter_b] {
        assert_eq!(ledger.holding(&account.address, token), Some(config.token.distribution_amount));
    }
    assert_eq!(
        ledger.holding(&config.accounts.creator.address, token),
        Some(config.token.total - 3 * config.token.distribution_amount)
    );

    let app_address = harness.ledger.application_address(app);
    assert_eq!(ledger.holding(&app_address, token), Some(0));
    assert!(ledger.balance(&app_address) > 0);

    for handle in [handles::DAO_FUND_LSIG, handles::PROPOSAL_LSIG] {
        let contract = report.get(handle).unwrap().as_contract().unwrap().clone();
        assert!(ledger.balance(&contract.address) > 0);
    }
    let dao_fund = report.get(handles::DAO_FUND_LSIG).unwrap().as_contract().unwrap().clone();
    assert_eq!(ledger.holding(&dao_fund.address, token), Some(0));

    assert_eq!(harness.store.list_completed().await.unwrap().len(), pipeline.len());
}

/// Test that fund-accounts binds every participant as a handle
#[tokio::test]
async fn test_accounts_bound_as_handles() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));

    let report = harness.engine.execute(&dao_graph(&config).unwrap()).await.unwrap();

    assert_eq!(
        report.get(handles::VOTER_B),
        Ok(HandleValue::Account(config.accounts.voter_b.address.clone()))
    );
    assert_eq!(
        report.get(handles::CREATOR),
        Ok(HandleValue::Account(config.accounts.creator.address.clone()))
    );
}

/// Test that re-running a finished deployment touches nothing
#[tokio::test]
async fn test_rerun_of_finished_deployment_is_a_no_op() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));
    let pipeline = dao_graph(&config).unwrap();
    let first = harness.engine.execute(&pipeline).await.unwrap();
    let submitted = harness.ledger.submissions().len();

    let (engine, events) = harness.rerun(&config);
    let second = engine.execute(&pipeline).await.unwrap();

    assert!(second.is_success());
    assert!(events.started_steps().is_empty());
    assert_eq!(harness.ledger.submissions().len(), submitted);
    assert_eq!(second.handles, first.handles);
    assert!(matches!(
        second.status(steps::DISTRIBUTE_TOKEN),
        Some(StepStatus::Checkpointed { .. })
    ));
}

/// Test that a deployment whose funding account cannot cover the participants fails first
#[tokio::test]
async fn test_underfunded_source_fails_fund_accounts() {
    let mut config: DeploymentConfig = dao_config();
    config.network.genesis_balance = config.funding.creator;
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));
    let pipeline = dao_graph(&config).unwrap();

    let report = harness.engine.execute(&pipeline).await.unwrap();

    assert_failed(&report, steps::FUND_ACCOUNTS);
    assert!(report.first_failure.as_ref().unwrap().error.is_ledger_rejection());
    assert_eq!(report.not_attempted.len(), pipeline.len() - 1);
    assert!(report.handles.is_empty());
    assert_eq!(harness.ledger.ledger().balance(&config.accounts.creator.address), 0);
}
