//! Test utility functions for provisioning scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use provision::core::config::DeploymentConfig;
use provision::core::{Address, ContractRef, Pipeline, StepStatus};
use provision::execution::{
    ExecutionEngine, ExecutionEvent, RetryPolicy, RunReport, SchedulingStrategy, TransactionExecutor,
};
use provision::ledger::{
    Confirmation, LedgerClient, LedgerError, Operation, OperationKind, SignedGroup, SimulatedLedger,
    TransactionGroup, TransactionSigner, TxStatus,
};
use provision::persistence::InMemoryCheckpointStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Selects the groups a fault applies to
pub type GroupMatcher = Arc<dyn Fn(&TransactionGroup) -> bool + Send + Sync>;

/// Groups containing an operation of `kind`
pub fn of_kind(kind: OperationKind) -> GroupMatcher {
    Arc::new(move |group: &TransactionGroup| group.kinds().contains(&kind))
}

/// Groups funding a contract compiled from `program`
pub fn funds_contract(program: &str) -> GroupMatcher {
    let program = program.to_string();
    Arc::new(move |group: &TransactionGroup| {
        group.requests().iter().any(|request| {
            matches!(request.operation(), Operation::FundContract { contract, .. } if contract.program == program)
        })
    })
}

/// A lone payment; in the DAO pipeline only `fund-app` submits one
pub fn single_payment() -> GroupMatcher {
    Arc::new(|group: &TransactionGroup| group.kinds() == vec![OperationKind::Payment])
}

#[derive(Debug, Clone)]
enum FaultKind {
    /// Fail with a transient error without reaching the ledger
    TransientBeforeSubmit,
    /// Commit, then lose the response
    DropAfterCommit,
    /// Refuse the group
    Reject(String),
}

struct Fault {
    matcher: GroupMatcher,
    kind: FaultKind,
    remaining: usize,
}

/// Simulated ledger that records every submission and injects faults
pub struct RecordingLedger {
    inner: SimulatedLedger,
    faults: Mutex<Vec<Fault>>,
    latencies: Mutex<Vec<(GroupMatcher, Duration)>>,
    compile_failures: AtomicUsize,
    submissions: Mutex<Vec<Vec<OperationKind>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingLedger {
    pub fn new(inner: SimulatedLedger) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            latencies: Mutex::new(Vec::new()),
            compile_failures: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_fault(self, matcher: GroupMatcher, kind: FaultKind, times: usize) -> Self {
        self.faults.lock().unwrap().push(Fault {
            matcher,
            kind,
            remaining: times,
        });
        self
    }

    /// The first `times` matching submissions fail with a network error
    pub fn fail_transiently(self, matcher: GroupMatcher, times: usize) -> Self {
        self.with_fault(matcher, FaultKind::TransientBeforeSubmit, times)
    }

    /// The first `times` matching submissions commit but report a network error
    pub fn drop_after_commit(self, matcher: GroupMatcher, times: usize) -> Self {
        self.with_fault(matcher, FaultKind::DropAfterCommit, times)
    }

    /// Every matching submission is rejected
    pub fn reject(self, matcher: GroupMatcher, reason: &str) -> Self {
        self.reject_times(matcher, reason, usize::MAX)
    }

    /// The first `times` matching submissions are rejected
    pub fn reject_times(self, matcher: GroupMatcher, reason: &str, times: usize) -> Self {
        self.with_fault(matcher, FaultKind::Reject(reason.to_string()), times)
    }

    /// Matching submissions take `latency` before they reach the ledger
    pub fn delay(self, matcher: GroupMatcher, latency: Duration) -> Self {
        self.latencies.lock().unwrap().push((matcher, latency));
        self
    }

    /// The next `times` logic compilations fail with a network error
    pub fn fail_compile(self, times: usize) -> Self {
        self.compile_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn ledger(&self) -> &SimulatedLedger {
        &self.inner
    }

    /// Operation kinds of every submit call, in arrival order
    pub fn submissions(&self) -> Vec<Vec<OperationKind>> {
        self.submissions.lock().unwrap().clone()
    }

    /// Submit calls whose group contains `kind`
    pub fn submit_count(&self, kind: OperationKind) -> usize {
        self.submissions()
            .iter()
            .filter(|kinds| kinds.contains(&kind))
            .count()
    }

    /// Highest number of submissions the ledger saw at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_fault(&self, group: &TransactionGroup) -> Option<FaultKind> {
        let mut faults = self.faults.lock().unwrap();
        let fault = faults
            .iter_mut()
            .find(|f| f.remaining > 0 && (f.matcher)(group))?;
        fault.remaining -= 1;
        Some(fault.kind.clone())
    }

    fn latency_for(&self, group: &TransactionGroup) -> Option<Duration> {
        self.latencies
            .lock()
            .unwrap()
            .iter()
            .find(|(matcher, _)| matcher(group))
            .map(|(_, latency)| *latency)
    }
}

#[async_trait]
impl TransactionSigner for RecordingLedger {
    async fn sign(&self, group: &TransactionGroup) -> Result<SignedGroup, LedgerError> {
        self.inner.sign(group).await
    }
}

#[async_trait]
impl LedgerClient for RecordingLedger {
    async fn submit(&self, signed: &SignedGroup) -> Result<(), LedgerError> {
        self.submissions.lock().unwrap().push(signed.group().kinds());

        let fault = self.take_fault(signed.group());
        match &fault {
            Some(FaultKind::TransientBeforeSubmit) => {
                return Err(LedgerError::Transient("connection reset by peer".to_string()))
            }
            Some(FaultKind::Reject(reason)) => return Err(LedgerError::Rejected(reason.clone())),
            _ => {}
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency_for(signed.group()) {
            tokio::time::sleep(latency).await;
        }
        let result = self.inner.submit(signed).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match fault {
            Some(FaultKind::DropAfterCommit) if result.is_ok() => {
                Err(LedgerError::Transient("response lost after commit".to_string()))
            }
            _ => result,
        }
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus, LedgerError> {
        self.inner.status(tx_id).await
    }

    async fn wait_for_confirmation(
        &self,
        tx_id: &str,
        rounds: u64,
    ) -> Result<Option<Confirmation>, LedgerError> {
        self.inner.wait_for_confirmation(tx_id, rounds).await
    }

    async fn compile_logic(
        &self,
        program: &str,
        template_params: &BTreeMap<String, String>,
    ) -> Result<ContractRef, LedgerError> {
        let failing = self
            .compile_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Transient("connection reset".to_string()));
        }
        self.inner.compile_logic(program, template_params).await
    }

    fn application_address(&self, app_id: u64) -> Address {
        self.inner.application_address(app_id)
    }
}

/// Default deployment with a retry policy fast enough for tests
pub fn dao_config() -> DeploymentConfig {
    let mut config = DeploymentConfig::default();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

/// Fresh ledger where only the funding account holds a balance
pub fn funded_ledger(config: &DeploymentConfig) -> SimulatedLedger {
    SimulatedLedger::new().with_account(
        config.accounts.funding.address.clone(),
        config.network.genesis_balance,
    )
}

/// Collects engine events in emission order
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventLog {
    pub fn attach(engine: &ExecutionEngine) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        engine.add_event_handler(move |event| events.lock().unwrap().push(event));
        log
    }

    pub fn all(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Position of the step's start event
    pub fn started(&self, step: &str) -> Option<usize> {
        self.all()
            .iter()
            .position(|e| matches!(e, ExecutionEvent::StepStarted { step: s } if s == step))
    }

    /// Position of the event that settled the step
    pub fn settled(&self, step: &str) -> Option<usize> {
        self.all().iter().position(|e| match e {
            ExecutionEvent::StepCompleted { step: s, .. }
            | ExecutionEvent::StepFailed { step: s, .. }
            | ExecutionEvent::StepCheckpointed { step: s, .. } => s == step,
            _ => false,
        })
    }

    /// Steps whose action was started, in order
    pub fn started_steps(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepStarted { step } => Some(step),
                _ => None,
            })
            .collect()
    }

    /// Steps running right after event `index`
    pub fn running_at(&self, index: usize) -> Vec<String> {
        let events = self.all();
        let mut running = Vec::new();
        for event in events.iter().take(index + 1) {
            match event {
                ExecutionEvent::StepStarted { step } => running.push(step.clone()),
                ExecutionEvent::StepCompleted { step, .. } | ExecutionEvent::StepFailed { step, .. } => {
                    running.retain(|s| s != step)
                }
                _ => {}
            }
        }
        running
    }
}

/// Engine, ledger, store and event log wired together
pub struct Harness {
    pub ledger: Arc<RecordingLedger>,
    pub store: Arc<InMemoryCheckpointStore>,
    pub engine: ExecutionEngine,
    pub events: EventLog,
}

impl Harness {
    pub fn new(config: &DeploymentConfig, ledger: RecordingLedger) -> Self {
        Self::with_store(config, ledger, Arc::new(InMemoryCheckpointStore::new()))
    }

    pub fn with_store(
        config: &DeploymentConfig,
        ledger: RecordingLedger,
        store: Arc<InMemoryCheckpointStore>,
    ) -> Self {
        Self::build(config, ledger, store, SchedulingStrategy::Parallel)
    }

    pub fn build(
        config: &DeploymentConfig,
        ledger: RecordingLedger,
        store: Arc<InMemoryCheckpointStore>,
        strategy: SchedulingStrategy,
    ) -> Self {
        let ledger = Arc::new(ledger);
        let executor = TransactionExecutor::new(ledger.clone(), ledger.clone())
            .with_retry_policy(config.retry.policy())
            .with_confirm_rounds(config.network.confirm_rounds);
        let engine = ExecutionEngine::new(Arc::new(executor), store.clone(), strategy);
        let events = EventLog::attach(&engine);

        Self {
            ledger,
            store,
            engine,
            events,
        }
    }

    /// A fresh engine over the same ledger and checkpoint store, as a re-run would use
    pub fn rerun(&self, config: &DeploymentConfig) -> (ExecutionEngine, EventLog) {
        let executor = TransactionExecutor::new(self.ledger.clone(), self.ledger.clone())
            .with_retry_policy(config.retry.policy())
            .with_confirm_rounds(config.network.confirm_rounds);
        let engine = ExecutionEngine::new(
            Arc::new(executor),
            self.store.clone(),
            SchedulingStrategy::Parallel,
        );
        let events = EventLog::attach(&engine);
        (engine, events)
    }
}

/// Retry policy for executor-level scenarios
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

/// Assert that a step ran and completed in this run
pub fn assert_completed(report: &RunReport, step: &str) {
    assert!(
        matches!(report.status(step), Some(StepStatus::Completed { .. })),
        "expected {} to be completed, got {:?}",
        step,
        report.status(step)
    );
}

/// Assert that a step failed
pub fn assert_failed(report: &RunReport, step: &str) {
    assert!(
        matches!(report.status(step), Some(StepStatus::Failed { .. })),
        "expected {} to have failed, got {:?}",
        step,
        report.status(step)
    );
}

/// Assert that a step never started because `blocker` failed
pub fn assert_not_attempted(report: &RunReport, step: &str, blocker: &str) {
    match report.status(step) {
        Some(StepStatus::NotAttempted { blocked_by }) => assert_eq!(blocked_by, blocker),
        other => panic!("expected {} to be not attempted, got {:?}", step, other),
    }
}

/// Assert that every started step started after all its dependencies settled
pub fn assert_dependencies_respected(pipeline: &Pipeline, events: &EventLog) {
    for name in events.started_steps() {
        let started = events.started(&name).unwrap();
        let step = pipeline.step(&name).unwrap();
        for dependency in &step.dependencies {
            let settled = events
                .settled(dependency)
                .unwrap_or_else(|| panic!("{} started but {} never settled", name, dependency));
            assert!(
                settled < started,
                "{} started (event {}) before {} settled (event {})",
                name,
                started,
                dependency,
                settled
            );
        }
    }
}
