//! provision - deploys ledger resources as a resumable step graph

pub mod cli;
pub mod core;
pub mod deploy;
pub mod execution;
pub mod ledger;
pub mod persistence;

// Re-export commonly used types
pub use core::config::DeploymentConfig;
pub use core::{HandleRegistry, HandleValue, Pipeline, Step, StepContext, StepOutput, StepStatus};
pub use execution::{ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy, TransactionExecutor};
pub use ledger::{LedgerClient, SimulatedLedger, TransactionSigner};
pub use persistence::{CheckpointStore, InMemoryCheckpointStore};
