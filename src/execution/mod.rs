//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{ExecutionEngine, ExecutionEvent, PipelineError, RunReport, StepFailure, StepReport};
pub use executor::{next_delay, ExecutionError, RetryPolicy, TransactionExecutor};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
