//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every step completed or was restored from a checkpoint
    Completed,
    /// At least one step failed
    Failed,
}

/// State of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies
    Pending,
    /// Action is in flight
    Running { started_at: DateTime<Utc> },
    /// Action succeeded and its handles were committed
    Completed {
        handles: Vec<String>,
        tx_ids: Vec<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Skipped; handles were restored from the checkpoint store
    Checkpointed { handles: Vec<String> },
    /// Action returned an error
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Never started because an upstream step failed
    NotAttempted { blocked_by: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running { .. })
    }

    /// Completed or Checkpointed; dependants may start
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Completed { .. } | StepStatus::Checkpointed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running { .. } => "running",
            StepStatus::Completed { .. } => "completed",
            StepStatus::Checkpointed { .. } => "checkpointed",
            StepStatus::Failed { .. } => "failed",
            StepStatus::NotAttempted { .. } => "not attempted",
        }
    }
}

/// Progress counters for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: ExecutionStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_steps: usize,

    /// Completed and checkpointed steps
    pub succeeded_steps: usize,

    /// Failed and not-attempted steps
    pub unsuccessful_steps: usize,

    pub running_steps: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            succeeded_steps: 0,
            unsuccessful_steps: 0,
            running_steps: 0,
        }
    }

    pub fn start(&mut self, total_steps: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Recount from the current step statuses
    pub fn update_counts<'a, I>(&mut self, statuses: I)
    where
        I: IntoIterator<Item = &'a StepStatus>,
    {
        let (mut succeeded, mut unsuccessful, mut running) = (0, 0, 0);
        for status in statuses {
            match status {
                s if s.is_success() => succeeded += 1,
                StepStatus::Running { .. } => running += 1,
                StepStatus::Pending => {}
                _ => unsuccessful += 1,
            }
        }
        self.succeeded_steps = succeeded;
        self.unsuccessful_steps = unsuccessful;
        self.running_steps = running;
    }

    /// Fraction of steps in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.succeeded_steps + self.unsuccessful_steps) as f64 / self.total_steps as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
