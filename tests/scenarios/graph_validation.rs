//! Test: Graph Validation - malformed graphs are rejected before any step runs

use crate::helpers::*;
use provision::core::{GraphError, Step, StepContext, StepOutput};
use provision::deploy::dao_graph;
use provision::execution::PipelineError;
use provision::ledger::{Signer, TransactionGroup, TransactionRequest};
use provision::core::Address;

/// A step that would move funds if it ever ran
fn paying_step(name: &str) -> Step {
    Step::new(name).with_fn(|ctx: StepContext| async move {
        let group = TransactionGroup::single(TransactionRequest::payment(
            Signer::Key(Address::new("MASTERACCOUNT")),
            Address::new("SINK"),
            1_000,
        ));
        let confirmation = ctx.submit(group).await?;
        Ok(StepOutput::new().with_confirmation(confirmation))
    })
}

/// Test that a two-step cycle is rejected with its path
#[tokio::test]
async fn test_cycle_rejected_before_any_step_runs() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));

    let steps = vec![
        paying_step("a").depends_on(["b"]),
        paying_step("b").depends_on(["a"]),
    ];
    let result = harness.engine.run("cyclic", steps).await;

    match result {
        Err(PipelineError::Graph(GraphError::CyclicDependency { cycle })) => {
            assert!(cycle == "a -> b -> a" || cycle == "b -> a -> b", "cycle: {}", cycle);
        }
        other => panic!("expected a cycle error, got {:?}", other.map(|r| r.state.status)),
    }

    assert!(harness.ledger.submissions().is_empty());
    assert!(harness.events.started_steps().is_empty());
}

/// Test that two producers of one handle are rejected
#[tokio::test]
async fn test_duplicate_producer_rejected() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));

    let steps = vec![
        paying_step("mint-a").produces(["token"]),
        paying_step("mint-b").produces(["token"]),
    ];

    assert!(matches!(
        harness.engine.run("duplicate", steps).await,
        Err(PipelineError::Graph(GraphError::DuplicateProducer { .. }))
    ));
    assert!(harness.ledger.submissions().is_empty());
}

/// Test that reading a handle no ancestor produces is rejected
#[tokio::test]
async fn test_read_from_non_ancestor_rejected() {
    let config = dao_config();
    let harness = Harness::new(&config, RecordingLedger::new(funded_ledger(&config)));

    // Sibling, not ancestor
    let steps = vec![
        paying_step("mint").produces(["token"]),
        paying_step("spend").reads(["token"]),
    ];

    match harness.engine.run("siblings", steps).await {
        Err(PipelineError::Graph(GraphError::UndeclaredRead { step, handle })) => {
            assert_eq!(step, "spend");
            assert_eq!(handle, "token");
        }
        other => panic!("expected an undeclared read, got {:?}", other.map(|r| r.state.status)),
    }
}

/// Test that every started step started after its dependencies settled
#[tokio::test]
async fn test_dao_steps_start_after_their_dependencies() {
    let config = dao_config();
    let ledger = funded_ledger(&config).with_latency(std::time::Duration::from_millis(5));
    let harness = Harness::new(&config, RecordingLedger::new(ledger));
    let pipeline = dao_graph(&config).unwrap();

    let report = harness.engine.execute(&pipeline).await.unwrap();

    assert!(report.is_success());
    assert_dependencies_respected(&pipeline, &harness.events);
    assert_eq!(harness.events.started_steps().len(), pipeline.len() - 1);
}
