//! Step domain model

use crate::core::registry::{HandleView, RegistryError};
use crate::core::handle::{ContractRef, HandleValue};
use crate::execution::executor::{ExecutionError, TransactionExecutor};
use crate::ledger::{Confirmation, GroupError, LedgerClient, LedgerError, TransactionGroup};
use crate::persistence::CheckpointError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Whether a step may share the ledger with other running steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Concurrency {
    /// Runs alone among exclusive steps and apart from any step touching its handles
    #[default]
    Exclusive,
    /// May run beside other parallel-safe steps
    ParallelSafe,
}

/// Why a step action failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The task running the step ended without a result
    #[error("step task aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Other(String),
}

impl From<LedgerError> for StepError {
    fn from(err: LedgerError) -> Self {
        StepError::Execution(err.into())
    }
}

impl StepError {
    /// Whether the ledger itself refused a transaction
    pub fn is_ledger_rejection(&self) -> bool {
        matches!(
            self,
            StepError::Execution(ExecutionError::LedgerRejection { .. })
        )
    }
}

/// What a finished action hands back to the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Handles to commit, in production order
    pub handles: Vec<(String, HandleValue)>,

    /// Confirmations of every group the step submitted
    pub confirmations: Vec<Confirmation>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(mut self, name: impl Into<String>, value: HandleValue) -> Self {
        self.handles.push((name.into(), value));
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmations.push(confirmation);
        self
    }

    /// Transaction ids of all confirmed groups
    pub fn tx_ids(&self) -> Vec<String> {
        self.confirmations
            .iter()
            .flat_map(|c| c.tx_ids.iter().cloned())
            .collect()
    }
}

/// Everything an action may touch while it runs
#[derive(Clone)]
pub struct StepContext {
    step: String,
    handles: HandleView,
    executor: Arc<TransactionExecutor>,
}

impl StepContext {
    pub fn new(step: impl Into<String>, handles: HandleView, executor: Arc<TransactionExecutor>) -> Self {
        Self {
            step: step.into(),
            handles,
            executor,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// Read-only view of the handles this step declares
    pub fn handles(&self) -> &HandleView {
        &self.handles
    }

    /// Submit a group through the executor and wait for it to confirm
    pub async fn submit(&self, group: TransactionGroup) -> Result<Confirmation, StepError> {
        Ok(self.executor.submit(&group).await?)
    }

    /// Compile a logic program, retrying transient ledger errors
    pub async fn compile_logic(
        &self,
        program: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ContractRef, StepError> {
        Ok(self.executor.compile_logic(program, params).await?)
    }

    /// Direct ledger access for local derivations such as application addresses
    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        self.executor.client()
    }
}

/// The work a step performs
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError>;
}

/// Adapter that turns an async closure into a [`StepAction`]
pub struct FnAction<F>(F);

impl<F> FnAction<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutput, StepError>> + Send,
{
    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        (self.0)(ctx).await
    }
}

/// A single step in a pipeline
#[derive(Clone)]
pub struct Step {
    /// Unique step name
    pub name: String,

    /// Names of steps that must succeed first
    pub dependencies: Vec<String>,

    /// Handles the action reads
    pub reads: Vec<String>,

    /// Handles the action must produce
    pub produces: Vec<String>,

    pub concurrency: Concurrency,

    /// `None` for barrier steps
    action: Option<Arc<dyn StepAction>>,
}

impl Step {
    /// New exclusive step with no dependencies and no action
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            reads: Vec::new(),
            produces: Vec::new(),
            concurrency: Concurrency::Exclusive,
            action: None,
        }
    }

    /// A step that only groups its dependencies under one name
    pub fn barrier<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name).depends_on(members).parallel_safe()
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn reads<I, S>(mut self, handles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(handles.into_iter().map(Into::into));
        self
    }

    pub fn produces<I, S>(mut self, handles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces.extend(handles.into_iter().map(Into::into));
        self
    }

    pub fn parallel_safe(mut self) -> Self {
        self.concurrency = Concurrency::ParallelSafe;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.concurrency = Concurrency::Exclusive;
        self
    }

    pub fn with_action(mut self, action: impl StepAction + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    /// Shorthand for `with_action(FnAction::new(f))`
    pub fn with_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
    {
        self.with_action(FnAction::new(f))
    }

    pub fn action(&self) -> Option<Arc<dyn StepAction>> {
        self.action.clone()
    }

    pub fn is_barrier(&self) -> bool {
        self.action.is_none()
    }

    pub fn is_exclusive(&self) -> bool {
        self.concurrency == Concurrency::Exclusive
    }

    /// Declared reads and produces together
    pub fn touched_handles(&self) -> BTreeSet<&str> {
        self.reads
            .iter()
            .chain(self.produces.iter())
            .map(String::as_str)
            .collect()
    }

    /// Whether this step shares a declared handle with another
    pub fn shares_handles_with(&self, other: &Step) -> bool {
        let mine = self.touched_handles();
        other.touched_handles().iter().any(|h| mine.contains(h))
    }

    pub fn dependencies_satisfied(&self, succeeded: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| succeeded.contains(dep))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("reads", &self.reads)
            .field("produces", &self.produces)
            .field("concurrency", &self.concurrency)
            .field("barrier", &self.is_barrier())
            .finish()
    }
}
