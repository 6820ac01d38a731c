//! Main execution engine - orchestrates the entire pipeline run

use crate::core::{
    ExecutionStatus, GraphError, HandleRegistry, HandleValue, Pipeline, RegistryError, RunState,
    Step, StepContext, StepError, StepOutput, StepStatus,
};
use crate::execution::{ExecutionScheduler, SchedulingStrategy, TransactionExecutor};
use crate::persistence::{CheckpointError, CheckpointStore};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepCheckpointed {
        step: String,
        handles: Vec<String>,
    },
    StepStarted {
        step: String,
    },
    StepCompleted {
        step: String,
        handles: Vec<String>,
        tx_ids: Vec<String>,
    },
    StepFailed {
        step: String,
        error: String,
    },
    StepNotAttempted {
        step: String,
        blocked_by: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Failures that stop a run before or instead of executing steps
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// The first step that failed in a run
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub message: String,
    #[serde(skip)]
    pub error: StepError,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline_name: String,

    pub state: RunState,

    /// Every step, in execution order
    pub steps: Vec<StepReport>,

    /// Registry contents when the run ended
    pub handles: BTreeMap<String, HandleValue>,

    pub first_failure: Option<StepFailure>,

    pub not_attempted: Vec<String>,

    #[serde(skip)]
    registry: HandleRegistry,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state.status == ExecutionStatus::Completed
    }

    pub fn status(&self, step: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.name == step).map(|s| &s.status)
    }

    /// Registry the run populated
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn get(&self, handle: &str) -> Result<HandleValue, RegistryError> {
        self.registry.get(handle)
    }
}

type StepResult = Result<StepOutput, StepError>;

/// Await a spawned step, keeping its name even if the task panicked
async fn joined(name: String, handle: JoinHandle<StepResult>) -> (String, Result<StepResult, JoinError>) {
    (name, handle.await)
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    scheduler: ExecutionScheduler,
    executor: Arc<TransactionExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

/// Mutable bookkeeping for one run
struct RunContext<'p> {
    pipeline: &'p Pipeline,
    registry: HandleRegistry,
    statuses: HashMap<String, StepStatus>,
    first_failure: Option<StepFailure>,
}

impl ExecutionEngine {
    pub fn new(
        executor: Arc<TransactionExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        strategy: SchedulingStrategy,
    ) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor,
            checkpoints,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Validate `steps` as a pipeline and execute it
    pub async fn run(&self, name: &str, steps: Vec<Step>) -> Result<RunReport, PipelineError> {
        let pipeline = Pipeline::new(name, steps)?;
        self.execute(&pipeline).await
    }

    /// Execute the entire pipeline
    ///
    /// Step failures are recorded in the report; only an inconsistent
    /// checkpoint store aborts the run, and it does so before any step runs.
    pub async fn execute(&self, pipeline: &Pipeline) -> Result<RunReport, PipelineError> {
        let mut state = RunState::new();
        state.start(pipeline.len());

        info!(pipeline = %pipeline.name, run_id = %state.run_id, steps = pipeline.len(), "starting run");
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id: state.run_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: pipeline.len(),
        });

        let mut run = RunContext {
            pipeline,
            registry: HandleRegistry::new(),
            statuses: pipeline
                .steps()
                .iter()
                .map(|s| (s.name.clone(), StepStatus::Pending))
                .collect(),
            first_failure: None,
        };

        if let Err(err) = self.restore_checkpoints(&mut run).await {
            error!(error = %err, "checkpoint store is inconsistent, aborting before any step runs");
            state.fail();
            self.emit_event(ExecutionEvent::PipelineCompleted {
                run_id: state.run_id,
                status: ExecutionStatus::Failed,
            });
            return Err(err);
        }

        let mut in_flight = FuturesUnordered::new();

        loop {
            loop {
                let next = self.scheduler.next_steps(pipeline, &run.statuses);
                if next.is_empty() {
                    break;
                }

                let mut settled_barrier = false;
                for name in next {
                    let Some(step) = pipeline.step(&name) else {
                        continue;
                    };
                    let started_at = Utc::now();
                    run.statuses
                        .insert(name.clone(), StepStatus::Running { started_at });

                    match step.action() {
                        None => {
                            debug!(step = %name, "barrier reached");
                            self.settle(&mut run, &name, Ok(StepOutput::new())).await;
                            settled_barrier = true;
                        }
                        Some(action) => {
                            info!(step = %name, concurrency = ?step.concurrency, "step started");
                            self.emit_event(ExecutionEvent::StepStarted { step: name.clone() });

                            let view = run.registry.view(&name, step.reads.iter().cloned());
                            let ctx = StepContext::new(name.clone(), view, self.executor.clone());
                            let handle = tokio::spawn(async move { action.run(ctx).await });
                            in_flight.push(joined(name, handle));
                        }
                    }
                }

                if !settled_barrier {
                    break;
                }
            }

            let Some((name, outcome)) = in_flight.next().await else {
                break;
            };
            let result = outcome.unwrap_or_else(|e| Err(StepError::Aborted(e.to_string())));
            self.settle(&mut run, &name, result).await;
        }

        state.update_counts(run.statuses.values());
        let all_succeeded = run.statuses.values().all(StepStatus::is_success);
        if all_succeeded {
            state.complete();
        } else {
            state.fail();
        }

        let steps: Vec<StepReport> = pipeline
            .execution_order()
            .iter()
            .map(|name| StepReport {
                name: name.clone(),
                status: run.statuses.get(name).cloned().unwrap_or(StepStatus::Pending),
            })
            .collect();
        let not_attempted = steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::NotAttempted { .. }))
            .map(|s| s.name.clone())
            .collect();

        info!(pipeline = %pipeline.name, status = ?state.status, "run finished");
        self.emit_event(ExecutionEvent::PipelineCompleted {
            run_id: state.run_id,
            status: state.status,
        });

        Ok(RunReport {
            pipeline_name: pipeline.name.clone(),
            state,
            steps,
            handles: run.registry.snapshot(),
            first_failure: run.first_failure,
            not_attempted,
            registry: run.registry,
        })
    }

    /// Mark steps whose checkpoint chain is intact as checkpointed and load their handles
    async fn restore_checkpoints(&self, run: &mut RunContext<'_>) -> Result<(), PipelineError> {
        for name in run.pipeline.execution_order() {
            let Some(step) = run.pipeline.step(name) else {
                continue;
            };
            if !self.checkpoints.has_completed(name).await? {
                continue;
            }

            let chain_intact = step.dependencies.iter().all(|dep| {
                matches!(run.statuses.get(dep), Some(StepStatus::Checkpointed { .. }))
            });
            if !chain_intact {
                info!(step = %name, "checkpoint ignored: upstream steps will re-run");
                continue;
            }

            let mut handles = Vec::with_capacity(step.produces.len());
            for handle in &step.produces {
                match self.checkpoints.load_handle(handle).await? {
                    Some(value) => handles.push((handle.clone(), value)),
                    None => {
                        return Err(CheckpointError::CheckpointMismatch {
                            step: name.clone(),
                            handle: handle.clone(),
                            reason: "is missing from the checkpoint store".to_string(),
                        }
                        .into())
                    }
                }
            }

            run.registry.commit(name, handles).map_err(|e| {
                CheckpointError::CheckpointMismatch {
                    step: name.clone(),
                    handle: step.produces.join(","),
                    reason: e.to_string(),
                }
            })?;

            info!(step = %name, "restored from checkpoint");
            run.statuses.insert(
                name.clone(),
                StepStatus::Checkpointed {
                    handles: step.produces.clone(),
                },
            );
            self.emit_event(ExecutionEvent::StepCheckpointed {
                step: name.clone(),
                handles: step.produces.clone(),
            });
        }

        Ok(())
    }

    /// Record a finished step: commit its handles, checkpoint it, or fail it
    async fn settle(&self, run: &mut RunContext<'_>, name: &str, result: StepResult) {
        let started_at = match run.statuses.get(name) {
            Some(StepStatus::Running { started_at }) => *started_at,
            _ => Utc::now(),
        };

        let output = match result.and_then(|output| Self::check_declared(run.pipeline, name, output)) {
            Ok(output) => output,
            Err(err) => return self.fail_step(run, name, err, started_at),
        };

        if let Err(err) = run.registry.commit(name, output.handles.clone()) {
            return self.fail_step(run, name, err.into(), started_at);
        }

        if let Err(err) = self.checkpoints.record_completed(name, &output.handles).await {
            warn!(step = %name, error = %err, "handles committed but checkpoint could not be written");
            return self.fail_step(run, name, err.into(), started_at);
        }

        let handles: Vec<String> = output.handles.iter().map(|(n, _)| n.clone()).collect();
        let tx_ids = output.tx_ids();
        info!(step = %name, handles = ?handles, transactions = tx_ids.len(), "step completed");

        run.statuses.insert(
            name.to_string(),
            StepStatus::Completed {
                handles: handles.clone(),
                tx_ids: tx_ids.clone(),
                started_at,
                completed_at: Utc::now(),
            },
        );
        self.emit_event(ExecutionEvent::StepCompleted {
            step: name.to_string(),
            handles,
            tx_ids,
        });
    }

    /// A step must produce exactly the handles it declares
    fn check_declared(pipeline: &Pipeline, name: &str, output: StepOutput) -> StepResult {
        let declared: BTreeSet<&str> = pipeline
            .step(name)
            .map(|s| s.produces.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let produced: BTreeSet<&str> = output.handles.iter().map(|(n, _)| n.as_str()).collect();

        if declared != produced || produced.len() != output.handles.len() {
            return Err(RegistryError::UnexpectedHandles {
                step: name.to_string(),
                produced: output.handles.iter().map(|(n, _)| n.clone()).collect(),
                declared: declared.iter().map(|s| s.to_string()).collect(),
            }
            .into());
        }

        Ok(output)
    }

    fn fail_step(
        &self,
        run: &mut RunContext<'_>,
        name: &str,
        err: StepError,
        started_at: DateTime<Utc>,
    ) {
        let message = err.to_string();
        error!(step = %name, error = %message, "step failed");

        run.statuses.insert(
            name.to_string(),
            StepStatus::Failed {
                error: message.clone(),
                started_at,
                failed_at: Utc::now(),
            },
        );
        self.emit_event(ExecutionEvent::StepFailed {
            step: name.to_string(),
            error: message.clone(),
        });

        if run.first_failure.is_none() {
            run.first_failure = Some(StepFailure {
                step: name.to_string(),
                message,
                error: err,
            });
        }

        for dependant in run.pipeline.dependants_of(name) {
            if matches!(run.statuses.get(&dependant), Some(StepStatus::Pending)) {
                warn!(step = %dependant, blocked_by = %name, "step will not be attempted");
                run.statuses.insert(
                    dependant.clone(),
                    StepStatus::NotAttempted {
                        blocked_by: name.to_string(),
                    },
                );
                self.emit_event(ExecutionEvent::StepNotAttempted {
                    step: dependant,
                    blocked_by: name.to_string(),
                });
            }
        }
    }
}
