//! Execution scheduler - determines which steps to run next

use crate::core::{Pipeline, Step, StepStatus};
use std::collections::{HashMap, HashSet};

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    Sequential,

    /// Execute every eligible step at once
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Strategy for an optional concurrency bound
    pub fn bounded(max_concurrency: Option<usize>) -> Self {
        match max_concurrency {
            Some(0) | None => SchedulingStrategy::Parallel,
            Some(1) => SchedulingStrategy::Sequential,
            Some(n) => SchedulingStrategy::LimitedParallel(n),
        }
    }

    fn limit(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Scheduler for determining which steps to run
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Pending steps whose dependencies all succeeded, in execution order
    pub fn frontier<'p>(
        &self,
        pipeline: &'p Pipeline,
        statuses: &HashMap<String, StepStatus>,
    ) -> Vec<&'p Step> {
        let succeeded: HashSet<String> = statuses
            .iter()
            .filter(|(_, status)| status.is_success())
            .map(|(name, _)| name.clone())
            .collect();

        pipeline
            .execution_order()
            .iter()
            .filter_map(|name| pipeline.step(name))
            .filter(|step| matches!(statuses.get(&step.name), Some(StepStatus::Pending) | None))
            .filter(|step| step.dependencies_satisfied(&succeeded))
            .collect()
    }

    /// Steps that may start now, given what is already running
    ///
    /// An exclusive step is never chosen beside another exclusive step or
    /// beside a step that shares one of its handles. A parallel-safe step is
    /// held back while an exclusive step touching one of its handles runs.
    pub fn next_steps(
        &self,
        pipeline: &Pipeline,
        statuses: &HashMap<String, StepStatus>,
    ) -> Vec<String> {
        let mut active: Vec<&Step> = statuses
            .iter()
            .filter(|(_, status)| matches!(status, StepStatus::Running { .. }))
            .filter_map(|(name, _)| pipeline.step(name))
            .collect();

        let mut slots = self.strategy.limit().saturating_sub(active.len());
        let mut chosen = Vec::new();

        for candidate in self.frontier(pipeline, statuses) {
            if slots == 0 {
                break;
            }
            if !Self::compatible(candidate, &active) {
                continue;
            }
            chosen.push(candidate.name.clone());
            active.push(candidate);
            slots -= 1;
        }

        chosen
    }

    fn compatible(candidate: &Step, active: &[&Step]) -> bool {
        active.iter().all(|other| {
            if candidate.is_exclusive() {
                !other.is_exclusive() && !candidate.shares_handles_with(other)
            } else {
                !(other.is_exclusive() && candidate.shares_handles_with(other))
            }
        })
    }
}
